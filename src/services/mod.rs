pub mod compile_service;
pub mod compiler;
pub mod staging;
