//! [`GraphNode`]: one immutable (post-compile) node in the DAG.

use deepx_core::initializer::Initializer;
use deepx_core::shape::Shape;
use deepx_core::stream::{InStream, OutStream, Result};
use deepx_core::error::SerializationError;

pub const GRAPH_NODE_VERSION: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Param,
    Instance,
    Hidden,
    Constant,
}

impl NodeType {
    fn tag(self) -> u8 {
        match self {
            NodeType::Param => 0,
            NodeType::Instance => 1,
            NodeType::Hidden => 2,
            NodeType::Constant => 3,
        }
    }
    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => NodeType::Param,
            1 => NodeType::Instance,
            2 => NodeType::Hidden,
            3 => NodeType::Constant,
            _ => return Err(SerializationError::Corrupt("unknown node type")),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorType {
    Tsr,
    Srm,
    Csr,
    Tsri,
    Tsrs,
}

impl TensorType {
    fn tag(self) -> u8 {
        match self {
            TensorType::Tsr => 0,
            TensorType::Srm => 1,
            TensorType::Csr => 2,
            TensorType::Tsri => 3,
            TensorType::Tsrs => 4,
        }
    }

    /// Reads a tensor-type tag, remapping the legacy `SRP`/`SVP`/`SRG`/`SVG`
    /// codes (10-13) onto `Srm` -- the param/grad and owned/viewing
    /// distinctions they once carried are not recoverable, so both sides
    /// collapse conservatively onto `Srm` (see DESIGN.md Open Questions).
    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => TensorType::Tsr,
            1 | 10 | 11 | 12 | 13 => TensorType::Srm,
            2 => TensorType::Csr,
            3 => TensorType::Tsri,
            4 => TensorType::Tsrs,
            _ => return Err(SerializationError::Corrupt("unknown tensor type")),
        })
    }
}

/// Re-exported so callers can name an initialiser without importing
/// `deepx_core::initializer` directly.
pub type InitializerSpec = Initializer;

/// One node in the compiled DAG. Inputs are arena indices (see
/// [`super::GraphBuilder`]); `need_grad`/`input_fork` are only meaningful
/// after [`super::Graph::compile`].
#[derive(Clone)]
pub struct GraphNode {
    pub name: String,
    pub node_id: u16,
    pub inputs: Vec<usize>,
    pub node_type: NodeType,
    pub tensor_type: TensorType,
    pub shape: Shape,
    pub initializer: Initializer,
    /// Whether this node *declared* it wants a gradient at construction.
    /// `need_grad` (below) additionally requires a consumer to need it.
    pub declared_need_grad: bool,
    pub need_grad: bool,
    pub input_fork: bool,
    pub op_class: String,
}

impl GraphNode {
    pub fn new(name: &str, node_type: NodeType, tensor_type: TensorType, shape: Shape) -> Self {
        GraphNode {
            name: name.to_string(),
            node_id: 0,
            inputs: Vec::new(),
            node_type,
            tensor_type,
            shape,
            initializer: Initializer::Zeros,
            declared_need_grad: false,
            need_grad: false,
            input_fork: false,
            op_class: String::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<usize>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_op_class(mut self, class_name: &str) -> Self {
        self.op_class = class_name.to_string();
        self
    }

    pub fn with_initializer(mut self, init: Initializer) -> Self {
        self.initializer = init;
        self
    }

    pub fn needing_grad(mut self) -> Self {
        self.declared_need_grad = true;
        self
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u32_(GRAPH_NODE_VERSION)?;
        os.write_str_(&self.name)?;
        os.write_u32_(self.node_id as u32)?;
        os.write_container_len(self.inputs.len())?;
        for &i in &self.inputs {
            os.write_u32_(i as u32)?;
        }
        os.write_u8_(self.node_type.tag())?;
        os.write_u8_(self.tensor_type.tag())?;
        os.write_container_len(self.shape.rank())?;
        for &d in self.shape.dims() {
            os.write_i64_(d)?;
        }
        self.initializer.write(os)?;
        os.write_u8_(self.declared_need_grad as u8)?;
        os.write_str_(&self.op_class)
    }

    /// Reads a node written by [`Self::write`]. Versions 0 and 1 are
    /// rejected outright; version 2 is read with its extra trailing
    /// fields ignored (`input_fork`/`need_grad` used to be persisted --
    /// both are recomputed by `Graph::compile` anyway).
    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let version = is.read_u32_()?;
        if version == 0 || version == 1 {
            return Err(SerializationError::VersionTooNew {
                found: version,
                max_supported: 0,
            });
        }
        if version > GRAPH_NODE_VERSION {
            return Err(SerializationError::VersionTooNew {
                found: version,
                max_supported: GRAPH_NODE_VERSION,
            });
        }

        let name = is.read_string()?;
        let node_id = is.read_u32_()? as u16;
        let n_inputs = is.read_container_len()?;
        let mut inputs = Vec::with_capacity(n_inputs);
        for _ in 0..n_inputs {
            inputs.push(is.read_u32_()? as usize);
        }
        let node_type = NodeType::from_tag(is.read_u8_()?)?;
        let tensor_type = TensorType::from_tag(is.read_u8_()?)?;
        let rank = is.read_container_len()?;
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(is.read_i64_()?);
        }
        let shape = Shape::from_dims(&dims);
        let initializer = Initializer::read(is)?;
        let declared_need_grad = is.read_u8_()? != 0;
        let op_class = is.read_string()?;

        if version == 2 {
            // Legacy extra fields: need_grad, input_fork (both recomputed
            // by compile; read and discard to stay positioned correctly).
            let _legacy_need_grad = is.read_u8_()?;
            let _legacy_input_fork = is.read_u8_()?;
        }

        Ok(GraphNode {
            name,
            node_id,
            inputs,
            node_type,
            tensor_type,
            shape,
            initializer,
            declared_need_grad,
            need_grad: false,
            input_fork: false,
            op_class,
        })
    }
}
