//! Keysym-to-scancode translation and the key/mouse state machines
//! that turn raw client input samples into RDP wire events.

pub mod keymap;
pub mod keystate;
pub mod mousestate;

pub use keymap::{Keymap, KeymapLayer, ScancodeEntry, ScancodeFlags, us_qwerty_base};
pub use keystate::KeyStateMachine;
pub use mousestate::{MouseOutput, MouseStateMachine};
