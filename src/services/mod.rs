pub mod assembler;
pub mod chunker;
pub mod docx;
pub mod epub;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod source;
pub mod tokens;
