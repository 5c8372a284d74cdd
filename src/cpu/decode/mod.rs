//! Instruction decoding module
//!
//! This module handles decoding of real-mode x86 instructions, including:
//! - Prefix and opcode walking
//! - ModR/M and SIB parsing
//! - Field records with identity and value-tracking flags
//! - Byte signatures used by the instruction caches

pub mod field;
pub mod instruction;
pub mod modrm;
pub mod parser;
pub mod reader;
pub mod signature;

pub use field::{FieldIx, InstructionField};
pub use instruction::{InstructionKind, ParsedInstruction, Prefixes, Width};
pub use modrm::{AddressForm, MemoryOperand, ModRm, RmOperand};
pub use parser::InstructionParser;
pub use reader::FieldReader;
pub use signature::Signature;
