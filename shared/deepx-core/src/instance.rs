//! The unit of work handed from the data layer to the graph: a batch of
//! named tensors plus the batch size they share.

use crate::stream::{InStream, OutStream, Result};
use crate::tensor_map::TensorMap;

#[derive(Clone, Default)]
pub struct Instance {
    pub tensor_map: TensorMap,
    pub batch: i32,
}

impl Instance {
    pub fn new(batch: i32) -> Self {
        Instance {
            tensor_map: TensorMap::new(),
            batch,
        }
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_i32_(self.batch)?;
        self.tensor_map.write(os)
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let batch = is.read_i32_()?;
        let tensor_map = TensorMap::read(is)?;
        Ok(Instance { tensor_map, batch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::stream::to_bytes;

    #[test]
    fn write_then_read_round_trips() {
        let inst = Instance::new(32);
        let bytes = to_bytes(|os| inst.write(os));
        let mut is = InStream::new(&bytes);
        let back = Instance::read(&mut is).unwrap();
        assert_eq!(back.batch, 32);
    }
}
