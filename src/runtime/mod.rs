//! Reference execution of generated images on the move machine

mod machine;

pub use machine::{MoveMachine, Step, DEFAULT_STEP_LIMIT, SCRATCH_SIZE};
