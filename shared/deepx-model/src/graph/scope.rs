//! A thread-local stack of name prefixes for building graphs with nested,
//! hierarchical node names (`"layer1/w"`, `"layer1/attn/q"`), grounded on
//! `include/deepx_core/graph/variable_scope.h`. Not load-bearing for any
//! compile invariant -- this only makes [`GraphBuilder`] pleasant to
//! call from code that builds the same sub-structure repeatedly.

use std::cell::RefCell;

use super::GraphBuilder;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Pushes `name` onto the thread-local scope stack for the duration of
/// `f`, then pops it -- even if `f` panics, via `Drop`.
pub fn with_scope<R>(name: &str, f: impl FnOnce() -> R) -> R {
    SCOPE_STACK.with(|s| s.borrow_mut().push(name.to_string()));
    struct PopGuard;
    impl Drop for PopGuard {
        fn drop(&mut self) {
            SCOPE_STACK.with(|s| {
                s.borrow_mut().pop();
            });
        }
    }
    let _guard = PopGuard;
    f()
}

/// Joins the current scope stack and `leaf` with `/`, matching §3's
/// `GraphNode` name charset (`[A-Za-z0-9_/:]`).
pub fn scoped_name(leaf: &str) -> String {
    SCOPE_STACK.with(|s| {
        let stack = s.borrow();
        if stack.is_empty() {
            leaf.to_string()
        } else {
            format!("{}/{}", stack.join("/"), leaf)
        }
    })
}

/// Convenience: pushes a [`super::GraphNode`] onto `builder` with its name
/// rewritten through [`scoped_name`]. Callers that don't use scopes can
/// keep calling `builder.push(node)` directly -- this only matters once
/// `with_scope` is in play.
pub fn push_scoped(builder: &mut GraphBuilder, mut node: super::GraphNode) -> usize {
    node.name = scoped_name(&node.name);
    builder.push(node)
}
