pub mod amf0_command;
pub mod amf0_data;
pub mod control;
pub mod user_control;
