//! Integration test modules.

mod control_writer_test;
mod device_session_test;
mod sensor_mock;
