/*!
# gnhast devkit - hub stub and test helpers

Helpers for testing collectors without a running hub:
- in-process mock hub over TCP, recording every line it receives
- line builders for the messages a hub sends
- scripted sensor sources
- a harness wiring a session to the mock hub with a manual clock
*/

pub mod fixtures;
pub mod hub_stub;
pub mod sensor_stub;
pub mod test_utils;

pub use fixtures::HubLines;
pub use hub_stub::MockHub;
pub use sensor_stub::ScriptedSensor;
pub use test_utils::{HookCall, RecordingHooks, TestHarness};
