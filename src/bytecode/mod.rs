pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod image;
pub mod op;

pub use compile::Compiler;
pub use image::Image;
pub use op::Opcode;
