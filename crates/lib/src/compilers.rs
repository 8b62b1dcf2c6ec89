//! Static metadata for the supported compiler toolchains
//!
//! Each supported compiler maps to the Ubuntu release that ships (or can
//! install) that toolchain version. The table is the single authority for
//! which compilers exist; everything else derives from it.

/// Toolchain family of a supported compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFamily {
    /// GNU Compiler Collection
    Gcc,
    /// LLVM Clang
    Clang,
}

impl CompilerFamily {
    /// Name of the build argument that carries this family's version.
    ///
    /// The image build definition accepts GCC_VERSION and CLANG_VERSION as
    /// mutually exclusive arguments; only the relevant one is ever passed.
    pub fn version_build_arg(&self) -> &'static str {
        match self {
            CompilerFamily::Gcc => "GCC_VERSION",
            CompilerFamily::Clang => "CLANG_VERSION",
        }
    }
}

/// A supported compiler and the Ubuntu base image it builds on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerSpec {
    /// Identifier such as `gcc-12` or `clang-15`
    pub id: &'static str,
    /// Toolchain family
    pub family: CompilerFamily,
    /// Version component of the identifier
    pub version: &'static str,
    /// Ubuntu base image version
    pub ubuntu: &'static str,
}

macro_rules! spec {
    ($id:literal, $family:ident, $version:literal, $ubuntu:literal) => {
        CompilerSpec {
            id: $id,
            family: CompilerFamily::$family,
            version: $version,
            ubuntu: $ubuntu,
        }
    };
}

/// All supported compilers, in batch ("all") processing order.
pub static COMPILERS: &[CompilerSpec] = &[
    spec!("clang-5", Clang, "5", "16.04"),
    spec!("clang-6", Clang, "6", "16.04"),
    spec!("clang-7", Clang, "7", "18.04"),
    spec!("clang-8", Clang, "8", "18.04"),
    spec!("clang-9", Clang, "9", "20.04"),
    spec!("clang-10", Clang, "10", "20.04"),
    spec!("clang-11", Clang, "11", "20.04"),
    spec!("clang-12", Clang, "12", "22.04"),
    spec!("clang-13", Clang, "13", "22.04"),
    spec!("clang-14", Clang, "14", "22.04"),
    spec!("clang-15", Clang, "15", "24.04"),
    spec!("clang-16", Clang, "16", "24.04"),
    spec!("clang-17", Clang, "17", "24.04"),
    spec!("gcc-4.9", Gcc, "4.9", "16.04"),
    spec!("gcc-5", Gcc, "5", "16.04"),
    spec!("gcc-6", Gcc, "6", "18.04"),
    spec!("gcc-7", Gcc, "7", "18.04"),
    spec!("gcc-8", Gcc, "8", "20.04"),
    spec!("gcc-9", Gcc, "9", "20.04"),
    spec!("gcc-10", Gcc, "10", "20.04"),
    spec!("gcc-11", Gcc, "11", "22.04"),
    spec!("gcc-12", Gcc, "12", "22.04"),
    spec!("gcc-13", Gcc, "13", "24.04"),
    spec!("gcc-14", Gcc, "14", "24.04"),
];

/// Look up a compiler by its identifier.
pub fn find(id: &str) -> Option<&'static CompilerSpec> {
    COMPILERS.iter().find(|c| c.id == id)
}
