pub mod backup;
pub mod compress;
pub mod dump;
pub mod hash;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod validator;
pub mod verify;
