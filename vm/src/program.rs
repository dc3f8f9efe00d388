use bytecode::{DecodeError, Routine};
use object::{Registry, RoutineId};

use crate::primitives::NativeDesc;
use crate::special::Specials;

/// A loaded program: the class registry, every compiled routine and the
/// native table.
///
/// Immutable after loading, so one `Arc<Program>` can back interpreters on
/// several threads.
#[derive(Debug)]
pub struct Program {
    registry: Registry,
    specials: Specials,
    routines: Vec<Routine>,
    natives: &'static [NativeDesc],
    entry: RoutineId,
}

impl Program {
    pub fn new(
        registry: Registry,
        specials: Specials,
        routines: Vec<Routine>,
        natives: &'static [NativeDesc],
        entry: RoutineId,
    ) -> Self {
        Self {
            registry,
            specials,
            routines,
            natives,
            entry,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn specials(&self) -> &Specials {
        &self.specials
    }

    pub fn routine(&self, id: RoutineId) -> Option<&Routine> {
        self.routines.get(id.0 as usize)
    }

    pub fn routines(&self) -> &[Routine] {
        &self.routines
    }

    pub fn routine_id(&self, name: &str) -> Option<RoutineId> {
        self.routines
            .iter()
            .position(|r| r.name == name)
            .map(|i| RoutineId(i as u16))
    }

    pub fn natives(&self) -> &'static [NativeDesc] {
        self.natives
    }

    pub fn entry(&self) -> RoutineId {
        self.entry
    }

    /// Disassembly of every routine, in id order.
    pub fn disassemble(&self) -> Result<String, DecodeError> {
        let mut out = String::new();
        for routine in &self.routines {
            out.push_str(&routine.disassemble()?);
            out.push('\n');
        }
        Ok(out)
    }
}
