//! Operator framework: fixed-arity tensor slots and dispatch.
//!
//! Each operator kind has a fixed number of named input and output slots.
//! The external scheduler populates the slots in dependency order, then runs
//! the operator through [`Operator::compute`]. An operator instance is
//! configuration only — it is reused across inference passes, and everything
//! per-invocation lives on the stack or in scratch regions for the duration
//! of one `compute` call.
//!
//! Lifecycle of one invocation: slots populated ("bound", checked at entry) →
//! computing → `Ok` (idle, ready for the next pass) or `Err` (failed, with
//! all scratch released on the way out).

use kilo_core::{KiloError, Result, Tensor};

use crate::context::ExecutionContext;
use crate::conv2d::Conv2dOperator;

/// Fixed-arity, ordered input slots holding non-owning tensor references.
pub struct InputSlots<'t, const N: usize> {
    slots: [Option<&'t Tensor>; N],
}

impl<'t, const N: usize> InputSlots<'t, N> {
    pub fn new() -> Self {
        Self { slots: [None; N] }
    }

    /// Populate a slot.
    pub fn bind(&mut self, slot: usize, tensor: &'t Tensor) -> Result<()> {
        if slot >= N {
            return Err(KiloError::SlotOutOfRange { slot, arity: N });
        }
        self.slots[slot] = Some(tensor);
        Ok(())
    }

    /// Required-slot access: `SlotUnbound` if the scheduler skipped it.
    pub fn get(&self, slot: usize) -> Result<&'t Tensor> {
        match self.slots.get(slot) {
            Some(&Some(t)) => Ok(t),
            Some(None) => Err(KiloError::SlotUnbound { slot }),
            None => Err(KiloError::SlotOutOfRange { slot, arity: N }),
        }
    }

    /// Optional-slot access.
    pub fn try_get(&self, slot: usize) -> Option<&'t Tensor> {
        self.slots.get(slot).copied().flatten()
    }

    /// Whether a slot is populated.
    pub fn has(&self, slot: usize) -> bool {
        self.try_get(slot).is_some()
    }
}

impl<'t, const N: usize> Default for InputSlots<'t, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-arity, ordered output slots holding exclusive tensor references.
pub struct OutputSlots<'t, const N: usize> {
    slots: [Option<&'t mut Tensor>; N],
}

impl<'t, const N: usize> OutputSlots<'t, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Populate a slot.
    pub fn bind(&mut self, slot: usize, tensor: &'t mut Tensor) -> Result<()> {
        if slot >= N {
            return Err(KiloError::SlotOutOfRange { slot, arity: N });
        }
        self.slots[slot] = Some(tensor);
        Ok(())
    }

    /// Required-slot access.
    pub fn get_mut(&mut self, slot: usize) -> Result<&mut Tensor> {
        match self.slots.get_mut(slot) {
            Some(Some(t)) => Ok(&mut **t),
            Some(None) => Err(KiloError::SlotUnbound { slot }),
            None => Err(KiloError::SlotOutOfRange { slot, arity: N }),
        }
    }

    /// Whether a slot is populated.
    pub fn has(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }
}

impl<'t, const N: usize> Default for OutputSlots<'t, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot containers at Conv2D arity (input, filter, bias → output).
pub type Conv2dInputs<'t> = InputSlots<'t, 3>;
pub type Conv2dOutputs<'t> = OutputSlots<'t, 1>;

/// The closed set of operator kinds this runtime executes.
///
/// Embedded models fix their operator set at build time, so dispatch is an
/// enum match rather than virtual indirection. New kinds slot in as
/// variants with their own arity aliases.
pub enum Operator {
    Conv2d(Conv2dOperator),
}

impl Operator {
    /// Execute one operator invocation against bound slots.
    pub fn compute(
        &self,
        ctx: &mut ExecutionContext,
        inputs: &Conv2dInputs<'_>,
        outputs: &mut Conv2dOutputs<'_>,
    ) -> Result<()> {
        match self {
            Operator::Conv2d(op) => op.compute(ctx, inputs, outputs),
        }
    }
}

impl From<Conv2dOperator> for Operator {
    fn from(op: Conv2dOperator) -> Self {
        Operator::Conv2d(op)
    }
}
