use std::{error::Error, fmt};

/// Byte order used for every multi-byte value in the toolchain: instruction
/// operands, the `.obc` container, and the VM stack.
pub type Endian = byteorder::LittleEndian;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    pub value: String,
    pub enum_name: &'static str,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Failed to parse \"{}\" as {}.",
            &self.value, &self.enum_name
        )
    }
}

impl Error for ParseEnumError {
    fn description(&self) -> &str {
        "Failed to parse enum."
    }
}

/// Parse a fieldless enum variant from its exact name.
pub trait EnumFromStr: Sized {
    fn from_str(s: &str) -> Result<Self, ParseEnumError>;
}

/// The variant name of a fieldless enum value, as a static string.
///
/// The instruction set derives this to get its mnemonic table: the mnemonic
/// of an opcode is exactly the enum variant name.
pub trait EnumName {
    fn enum_name(&self) -> &'static str;
}
