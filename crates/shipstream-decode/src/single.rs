//! Decodes on the calling task.

use async_trait::async_trait;
use shipstream_abi::{Abi, TypeTable};
use shipstream_core::ShipError;

use crate::request::{decode_batch, DecodeOutcome, DecodeRequest, Deserializer};

pub struct SingleThreadDeserializer {
    table: TypeTable,
}

impl SingleThreadDeserializer {
    pub fn new(abi: &Abi) -> Result<Self, ShipError> {
        Ok(Self {
            table: TypeTable::new(abi)?,
        })
    }
}

#[async_trait]
impl Deserializer for SingleThreadDeserializer {
    async fn deserialize(&self, batch: Vec<Option<DecodeRequest>>) -> Result<Vec<DecodeOutcome>, ShipError> {
        Ok(decode_batch(&self.table, batch))
    }

    async fn terminate(&self) {}
}
