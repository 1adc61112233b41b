mod exceptions;
mod frames;
mod generic;
mod helper;
mod introspection;
mod solutions;
mod tracing;
mod zones;
