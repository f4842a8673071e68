//! Fixed capacity storage for the closures of one shading point.
//!
//! Records and extra blocks share one budget of slots, like closures and their auxiliary data
//! share one array in the kernel. Running out of slots drops the closure instead of failing.

use log::trace;

use crate::{
    closure::ShaderClosure,
    microfacet::{ConductorFresnel, MicrofacetExtra},
    principled_hair::PrincipledHairExtra,
};

/// Default number of slots per shading point
pub const MAX_CLOSURE: usize = 64;

/// Closures with a smaller sample weight are not worth a slot
pub const CLOSURE_WEIGHT_CUTOFF: f64 = 1e-5;

/// Auxiliary data for closures that need more parameters than a record holds
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExtraData {
    Microfacet(MicrofacetExtra),
    Conductor(ConductorFresnel),
    PrincipledHair(PrincipledHairExtra),
}

/// Index of a block in an [`ExtraArena`]. Only valid for the shading point that handed it out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtraRef(usize);

#[derive(Clone, Debug, Default)]
pub struct ExtraArena {
    blocks: Vec<ExtraData>,
}

impl ExtraArena {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn get(&self, r: ExtraRef) -> Option<&ExtraData> {
        self.blocks.get(r.0)
    }

    #[must_use]
    pub fn get_mut(&mut self, r: ExtraRef) -> Option<&mut ExtraData> {
        self.blocks.get_mut(r.0)
    }

    #[must_use]
    pub fn microfacet(&self, r: Option<ExtraRef>) -> Option<&MicrofacetExtra> {
        match self.get(r?) {
            Some(ExtraData::Microfacet(extra)) => Some(extra),
            _ => None,
        }
    }

    #[must_use]
    pub fn conductor(&self, r: Option<ExtraRef>) -> Option<&ConductorFresnel> {
        match self.get(r?) {
            Some(ExtraData::Conductor(fresnel)) => Some(fresnel),
            _ => None,
        }
    }

    #[must_use]
    pub fn principled_hair(&self, r: Option<ExtraRef>) -> Option<&PrincipledHairExtra> {
        match self.get(r?) {
            Some(ExtraData::PrincipledHair(extra)) => Some(extra),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// The ordered closures of a shading point plus their extra blocks
#[derive(Clone, Debug)]
pub struct ClosureList {
    records: Vec<ShaderClosure>,
    extra: ExtraArena,
    capacity: usize,
}

impl Default for ClosureList {
    fn default() -> Self {
        Self::new(MAX_CLOSURE)
    }
}

impl ClosureList {
    /// Reserves all storage up front, nothing allocates after this
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            extra: ExtraArena::with_capacity(capacity),
            capacity,
        }
    }

    /// Forgets all closures, keeping the storage for the next shading point
    pub fn clear(&mut self) {
        self.records.clear();
        self.extra.blocks.clear();
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// slots that are still free for records or extra blocks
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.records.len() - self.extra.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ShaderClosure> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShaderClosure> {
        self.records.iter()
    }

    #[must_use]
    pub fn records(&self) -> &[ShaderClosure] {
        &self.records
    }

    #[must_use]
    pub const fn extra(&self) -> &ExtraArena {
        &self.extra
    }

    /// Splits the list into the record at `index` and the extra arena, for closure setups that
    /// write into their extra block
    pub fn record_and_extra_mut(
        &mut self,
        index: usize,
    ) -> Option<(&mut ShaderClosure, &mut ExtraArena)> {
        let record = self.records.get_mut(index)?;
        Some((record, &mut self.extra))
    }

    /// Appends a record. Returns `None` and leaves the list untouched if there is no free slot or
    /// the closure is too weak to matter.
    pub fn alloc(&mut self, closure: ShaderClosure) -> Option<usize> {
        if self.remaining() == 0 {
            trace!("closure list full, dropping {}", closure.base.ty);
            return None;
        }
        if closure.base.sample_weight < CLOSURE_WEIGHT_CUTOFF {
            return None;
        }
        self.records.push(closure);
        Some(self.records.len() - 1)
    }

    /// Reserves an extra block on its own
    pub fn alloc_extra(&mut self, data: ExtraData) -> Option<ExtraRef> {
        if self.remaining() == 0 {
            trace!("extra arena full, dropping block");
            return None;
        }
        self.extra.blocks.push(data);
        Some(ExtraRef(self.extra.blocks.len() - 1))
    }

    /// Reserves a record together with its extra block. Either both are stored or nothing is.
    pub fn alloc_with_extra(
        &mut self,
        data: ExtraData,
        make: impl FnOnce(ExtraRef) -> ShaderClosure,
    ) -> Option<usize> {
        if self.remaining() < 2 {
            trace!("closure list full, dropping closure with extra data");
            return None;
        }
        let r = ExtraRef(self.extra.blocks.len());
        let closure = make(r);
        if closure.base.sample_weight < CLOSURE_WEIGHT_CUTOFF {
            return None;
        }
        self.extra.blocks.push(data);
        self.records.push(closure);
        Some(self.records.len() - 1)
    }

    /// Mutable access for merging closures, e.g. the single transparent closure of a point
    pub fn find_mut(
        &mut self,
        pred: impl Fn(&ShaderClosure) -> bool,
    ) -> Option<&mut ShaderClosure> {
        self.records.iter_mut().find(|c| pred(c))
    }
}
