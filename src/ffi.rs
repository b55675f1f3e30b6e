//! Foreign calls: dynamic library resolution and a prep-and-call ABI
//! facility behind the [`AbiCall`] trait, so the interpreter never depends
//! on a particular host ABI library and tests can script foreign calls.

use std::os::raw::c_void;
use std::path::PathBuf;

use libffi::middle;

use oast::{Arena, NodeId, TypeKind};

use crate::interp::{ExitCode, Interpreter};

/// Owned description of a value's ABI shape. Built once at emission time
/// from the AST, so the running VM carries no arena references.
#[derive(Clone, Debug, PartialEq)]
pub enum AbiType {
    Void,
    SInt8,
    UInt8,
    SInt16,
    UInt16,
    SInt32,
    UInt32,
    SInt64,
    UInt64,
    Float,
    Double,
    Pointer,
    /// Flattened element list; nesting flattens recursively on the libffi
    /// side, with the null terminator the C ABI expects.
    Struct(Vec<AbiType>),
}

/// One parameter of a foreign function: its ABI shape plus the storage it
/// occupies on the VM stack (which the call site walks downward from `sp`).
#[derive(Clone, Debug, PartialEq)]
pub struct AbiParam {
    pub ty: AbiType,
    pub size: i64,
}

/// A `CALLE` call-site descriptor: the callee declaration reduced to its
/// name and signature.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalFn {
    pub name: String,
    pub params: Vec<AbiParam>,
    pub ret: AbiType,
}

/// Maps an AST type onto its ABI shape. Booleans cross the boundary as
/// signed 32-bit integers; enums as their underlying scalar; arrays as their
/// `{data, count}` header.
pub fn abi_type(arena: &Arena, ty: NodeId) -> AbiType {
    let ty = arena.resolve(ty);
    let data = arena.type_data(ty);

    match data.kind() {
        TypeKind::None => AbiType::Void,
        TypeKind::I8 => AbiType::SInt8,
        TypeKind::U8 => AbiType::UInt8,
        TypeKind::I16 => AbiType::SInt16,
        TypeKind::U16 => AbiType::UInt16,
        TypeKind::Boolean | TypeKind::I32 => AbiType::SInt32,
        TypeKind::U32 => AbiType::UInt32,
        TypeKind::I64 => AbiType::SInt64,
        TypeKind::U64 => AbiType::UInt64,
        TypeKind::F32 => AbiType::Float,
        TypeKind::F64 => AbiType::Double,
        TypeKind::Pointer => AbiType::Pointer,
        TypeKind::Enum => abi_type(arena, data.inner),
        TypeKind::Struct => {
            if data.secretly_array {
                AbiType::Struct(vec![AbiType::Pointer, AbiType::SInt64])
            } else {
                let fields = data
                    .params
                    .iter()
                    .map(|&p| abi_type(arena, arena.param_type(p)))
                    .collect();
                AbiType::Struct(fields)
            }
        }
        TypeKind::Fn => panic!("fn values do not cross the foreign boundary"),
    }
}

/// The prep-and-call seam. `prepare` turns a signature into a reusable
/// descriptor; `invoke` performs one call through it. Argument and return
/// locations are raw because they point into the VM stack.
pub trait AbiCall {
    fn prepare(&mut self, params: &[AbiParam], ret: &AbiType) -> Result<usize, String>;

    fn invoke(&mut self, descriptor: usize, fn_addr: usize, args: &[*mut c_void], ret: *mut c_void);
}

/// libffi-backed [`AbiCall`]. Descriptors are prepared `ffi_cif`s, kept for
/// the VM's lifetime.
pub struct CifAbi {
    cifs: Vec<middle::Cif>,
}

impl CifAbi {
    pub fn new() -> CifAbi {
        CifAbi { cifs: Vec::new() }
    }

    fn middle_type(ty: &AbiType) -> middle::Type {
        match ty {
            AbiType::Void => middle::Type::void(),
            AbiType::SInt8 => middle::Type::i8(),
            AbiType::UInt8 => middle::Type::u8(),
            AbiType::SInt16 => middle::Type::i16(),
            AbiType::UInt16 => middle::Type::u16(),
            AbiType::SInt32 => middle::Type::i32(),
            AbiType::UInt32 => middle::Type::u32(),
            AbiType::SInt64 => middle::Type::i64(),
            AbiType::UInt64 => middle::Type::u64(),
            AbiType::Float => middle::Type::f32(),
            AbiType::Double => middle::Type::f64(),
            AbiType::Pointer => middle::Type::pointer(),
            AbiType::Struct(fields) => {
                middle::Type::structure(fields.iter().map(CifAbi::middle_type))
            }
        }
    }
}

impl Default for CifAbi {
    fn default() -> CifAbi {
        CifAbi::new()
    }
}

impl AbiCall for CifAbi {
    fn prepare(&mut self, params: &[AbiParam], ret: &AbiType) -> Result<usize, String> {
        let args = params.iter().map(|p| CifAbi::middle_type(&p.ty));
        let cif = middle::Cif::new(args, CifAbi::middle_type(ret));
        self.cifs.push(cif);
        Ok(self.cifs.len() - 1)
    }

    fn invoke(
        &mut self,
        descriptor: usize,
        fn_addr: usize,
        args: &[*mut c_void],
        ret: *mut c_void,
    ) {
        let cif = &mut self.cifs[descriptor];
        let mut argv: Vec<*mut c_void> = args.to_vec();
        unsafe {
            libffi::raw::ffi_call(
                cif.as_raw_ptr(),
                Some(std::mem::transmute::<usize, unsafe extern "C" fn()>(fn_addr)),
                ret,
                argv.as_mut_ptr(),
            );
        }
    }
}

/// Candidate paths for a named library, in the order they are tried.
pub fn library_search_paths(name: &str) -> Vec<PathBuf> {
    let file = format!("{}{}", name, std::env::consts::DLL_SUFFIX);
    vec![
        PathBuf::from("/usr/local/lib").join(&file),
        PathBuf::from("/usr/lib").join(&file),
        PathBuf::from(".").join(&file),
        PathBuf::from(&file),
    ]
}

fn open_library(name: &str) -> Option<libloading::Library> {
    for path in library_search_paths(name) {
        if let Ok(lib) = libloading::Library::new(&path) {
            return Some(lib);
        }
    }
    None
}

impl Interpreter {
    /// The `CALLE` handler: resolve the symbol, gather argument pointers by
    /// walking parameter slots down from `sp`, and invoke. The return value
    /// lands one word past the saved-register region, exactly where a
    /// bytecode callee would have put it.
    pub(crate) fn calle(&mut self) {
        let index = self.consume::<i32>() as usize;
        let ext = self
            .external_fns
            .get(index)
            .unwrap_or_else(|| panic!("missing external-fn entry {}", index))
            .clone();

        let fn_addr = match self.resolve_symbol(&ext.name) {
            Ok(addr) => addr,
            Err(code) => return self.fail(code),
        };

        let descriptor = match self.abi.prepare(&ext.params, &ext.ret) {
            Ok(d) => d,
            Err(message) => {
                eprintln!("foreign call to {} failed: {}", ext.name, message);
                return self.fail(ExitCode::ForeignCallFailed(message));
            }
        };

        let mut args: Vec<*mut c_void> = Vec::with_capacity(ext.params.len());
        let mut param_sp = self.sp;
        for param in &ext.params {
            param_sp -= param.size;
            args.push(self.stack_ptr_mut(param_sp));
        }

        let ret_ptr = self.stack_ptr_mut(self.sp + 8);
        self.abi.invoke(descriptor, fn_addr, &args, ret_ptr);
    }

    fn open_libraries(&mut self) -> Result<(), ExitCode> {
        if self.libs_opened {
            return Ok(());
        }
        self.libs_opened = true;

        let names = self.lib_names.clone();
        for name in names {
            match open_library(&name) {
                Some(lib) => self.libs.push(lib),
                None => {
                    eprintln!("could not open library {}", name);
                    return Err(ExitCode::MissingLibrary(name));
                }
            }
        }
        Ok(())
    }

    fn resolve_symbol(&mut self, name: &str) -> Result<usize, ExitCode> {
        if let Some(&addr) = self.symbols.get(name) {
            return Ok(addr);
        }

        self.open_libraries()?;

        for lib in &self.libs {
            let symbol: Result<libloading::Symbol<unsafe extern "C" fn()>, _> =
                unsafe { lib.get(name.as_bytes()) };
            if let Ok(symbol) = symbol {
                let addr = *symbol as usize;
                self.symbols.insert(name.to_string(), addr);
                return Ok(addr);
            }
        }

        eprintln!("Fatal error: could not find external function {}", name);
        Err(ExitCode::MissingSymbol(name.to_string()))
    }
}
