pub const SUCCESS: i32 = 0;
/// Bad arguments, unreadable recording or rejected parameters
pub const INPUT_ERROR: i32 = 1;
pub const EXECUTION_ERROR: i32 = 2;
pub const BACKEND_NOT_INSTALLED: i32 = 3;
