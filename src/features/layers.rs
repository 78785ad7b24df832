use std::collections::HashMap;
use std::sync::RwLock;

use crate::utils::{Error, Result};

pub const MAX_LAYERS: usize = 250;

#[derive(Default)]
struct LayerTable {
    names: Vec<String>,
    ids: HashMap<String, u8>,
}

/// Assigns each layer name a one byte id, in order of first use. Shared by
/// every thread encoding or decoding features in one run.
#[derive(Default)]
pub struct LayerInterner {
    table: RwLock<LayerTable>,
}

impl LayerInterner {
    pub fn new() -> LayerInterner {
        LayerInterner::default()
    }

    pub fn intern(&self, name: &str) -> Result<u8> {
        if let Some(id) = self.read().ids.get(name) {
            return Ok(*id);
        }

        let mut table = match self.table.write() {
            Ok(t) => t,
            Err(p) => p.into_inner(),
        };
        if let Some(id) = table.ids.get(name) {
            return Ok(*id);
        }
        if table.names.len() >= MAX_LAYERS {
            return Err(Error::TooManyLayers(MAX_LAYERS));
        }
        let id = table.names.len() as u8;
        table.names.push(String::from(name));
        table.ids.insert(String::from(name), id);
        Ok(id)
    }

    pub fn name(&self, id: u8) -> Option<String> {
        self.read().names.get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LayerTable> {
        match self.table.read() {
            Ok(t) => t,
            Err(p) => p.into_inner(),
        }
    }
}
