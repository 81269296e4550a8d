use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::element::ElementType;
use crate::error::{RecordError, Result};

/// Layout of one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    /// 1-byte identifier (1-255).
    pub identifier: u8,
    /// Type shared by every element.
    pub element_type: ElementType,
    /// Element count, fixed at definition.
    pub length: usize,
}

impl RecordSpec {
    /// Encoded payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.length * self.element_type.width()
    }
}

/// Lightweight reference to a defined record.
///
/// Handles are only produced by [`RecordRegistry::define`] and
/// [`RecordRegistry::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    identifier: u8,
}

struct Slot {
    spec: RecordSpec,
    values: Mutex<Vec<i64>>,
}

impl Slot {
    fn values(&self) -> MutexGuard<'_, Vec<i64>> {
        // Values are always replaced whole, so a poisoned lock still holds a
        // consistent record.
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Identifier-keyed table of typed, fixed-length records.
///
/// Each record is guarded by its own lock: `update` and `unpack` replace
/// the whole value, so readers never observe a partially written record.
#[derive(Default)]
pub struct RecordRegistry {
    slots: RwLock<BTreeMap<u8, Arc<Slot>>>,
}

impl RecordRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry and define every record in `specs`.
    pub fn from_specs(specs: &[RecordSpec]) -> Result<Self> {
        let registry = Self::new();
        for spec in specs {
            registry.define(spec.identifier, spec.element_type, spec.length)?;
        }
        Ok(registry)
    }

    /// Define a new record initialised to zeros.
    pub fn define(
        &self,
        identifier: u8,
        element_type: ElementType,
        length: usize,
    ) -> Result<RecordHandle> {
        if identifier == 0 {
            return Err(RecordError::InvalidIdentifier(identifier));
        }
        if length == 0 {
            return Err(RecordError::InvalidLength { identifier, length });
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(&identifier) {
            return Err(RecordError::DuplicateIdentifier(identifier));
        }

        let spec = RecordSpec {
            identifier,
            element_type,
            length,
        };
        slots.insert(
            identifier,
            Arc::new(Slot {
                spec,
                values: Mutex::new(vec![0; length]),
            }),
        );
        tracing::debug!(
            identifier = %format_args!("{identifier:#04x}"),
            %element_type,
            length,
            "defined record"
        );

        Ok(RecordHandle { identifier })
    }

    /// Look up the handle of a defined record.
    pub fn handle(&self, identifier: u8) -> Option<RecordHandle> {
        self.slot(identifier)
            .ok()
            .map(|_| RecordHandle { identifier })
    }

    /// Identifier a handle refers to.
    pub fn identifier_of(&self, handle: RecordHandle) -> u8 {
        handle.identifier
    }

    /// Layout of a defined record.
    pub fn spec(&self, identifier: u8) -> Result<RecordSpec> {
        Ok(self.slot(identifier)?.spec)
    }

    /// Replace the stored values. Element ranges are checked by `pack`.
    pub fn update(&self, handle: RecordHandle, values: &[i64]) -> Result<()> {
        let slot = self.slot(handle.identifier)?;
        if values.len() != slot.spec.length {
            return Err(RecordError::LengthMismatch {
                identifier: handle.identifier,
                expected: slot.spec.length,
                actual: values.len(),
            });
        }
        slot.values().copy_from_slice(values);
        Ok(())
    }

    /// Current values of a record.
    pub fn get(&self, handle: RecordHandle) -> Result<Vec<i64>> {
        let slot = self.slot(handle.identifier)?;
        let values = slot.values().clone();
        Ok(values)
    }

    /// Serialize the current values.
    ///
    /// Every value is range-checked before any byte is produced, so an
    /// overflow never yields a partial buffer.
    pub fn pack(&self, handle: RecordHandle) -> Result<Bytes> {
        let slot = self.slot(handle.identifier)?;
        let spec = slot.spec;
        let values = slot.values().clone();

        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, &value)| !spec.element_type.contains(value))
        {
            return Err(RecordError::EncodeOverflow {
                identifier: spec.identifier,
                index,
                value,
                element_type: spec.element_type,
            });
        }

        let mut dst = BytesMut::with_capacity(spec.byte_len());
        for value in values {
            spec.element_type.put(value, &mut dst);
        }
        Ok(dst.freeze())
    }

    /// Decode `bytes` into the record registered under `identifier`, store
    /// the values, and return them.
    pub fn unpack(&self, identifier: u8, bytes: &[u8]) -> Result<Vec<i64>> {
        let slot = self.slot(identifier)?;
        let spec = slot.spec;
        if bytes.len() != spec.byte_len() {
            return Err(RecordError::LengthMismatch {
                identifier,
                expected: spec.byte_len(),
                actual: bytes.len(),
            });
        }

        let width = spec.element_type.width();
        let decoded: Vec<i64> = bytes
            .chunks_exact(width)
            .map(|chunk| spec.element_type.get(chunk))
            .collect();

        slot.values().copy_from_slice(&decoded);
        Ok(decoded)
    }

    /// Whether a record is registered under `identifier`.
    pub fn contains(&self, identifier: u8) -> bool {
        self.slot(identifier).is_ok()
    }

    /// All defined identifiers in ascending order.
    pub fn identifiers(&self) -> Vec<u8> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, identifier: u8) -> Result<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identifier)
            .cloned()
            .ok_or(RecordError::UnknownIdentifier(identifier))
    }
}

impl std::fmt::Debug for RecordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}
