//! The `.obc` container: a little-endian stream holding the function table
//! and the raw instruction bytes. No magic, no version.
//!
//! Layout: a `u32` function count, then per function a `{fn id: u32,
//! instruction index: u32}` record in table insertion order, then the
//! instruction bytes through end of file.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use opalvm::FnTable;
use util::Endian;

#[derive(Debug, Default, PartialEq)]
pub struct Bytecode {
    fn_table: FnTable,
    instructions: Vec<u8>,
}

impl Bytecode {
    pub fn from(fn_table: FnTable, instructions: Vec<u8>) -> Bytecode {
        Bytecode {
            fn_table,
            instructions,
        }
    }

    pub fn fn_table(&self) -> &FnTable {
        &self.fn_table
    }

    pub fn instructions(&self) -> &[u8] {
        &self.instructions[..]
    }

    pub fn into_parts(self) -> (FnTable, Vec<u8>) {
        (self.fn_table, self.instructions)
    }
}

pub fn read<R: Read>(reader: &mut R) -> std::io::Result<Bytecode> {
    let count = reader.read_u32::<Endian>()?;

    let mut fn_table = FnTable::new();
    for _ in 0..count {
        let id = reader.read_u32::<Endian>()?;
        let inst_index = reader.read_u32::<Endian>()?;
        fn_table.insert(id, u64::from(inst_index));
    }

    let mut instructions = Vec::new();
    reader.read_to_end(&mut instructions)?;

    Ok(Bytecode::from(fn_table, instructions))
}

pub fn write<W: Write>(writer: &mut W, bytecode: &Bytecode) -> std::io::Result<()> {
    writer.write_u32::<Endian>(bytecode.fn_table.len() as u32)?;
    for (id, inst_index) in bytecode.fn_table.iter() {
        writer.write_u32::<Endian>(id)?;
        writer.write_u32::<Endian>(inst_index as u32)?;
    }
    writer.write_all(&bytecode.instructions[..])?;
    Ok(())
}

pub trait ReadObcExt: Read + Sized {
    fn read_obc(&mut self) -> std::io::Result<Bytecode> {
        read(self)
    }
}

impl<R: Read + Sized> ReadObcExt for R {}

pub trait WriteObcExt: Write + Sized {
    fn write_obc(&mut self, bytecode: &Bytecode) -> std::io::Result<()> {
        write(self, bytecode)
    }
}

impl<W: Write + Sized> WriteObcExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> std::io::Result<Bytecode> {
    BufReader::new(File::open(path)?).read_obc()
}

pub fn write_file<P: AsRef<Path>>(path: P, bytecode: &Bytecode) -> std::io::Result<()> {
    BufWriter::new(File::create(path)?).write_obc(bytecode)
}
