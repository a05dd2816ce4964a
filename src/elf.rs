//! The class (ELFCLASS32/ELFCLASS64) abstraction and the handful of ELF bit
//! manipulations the symbol table needs. Endianness is a runtime
//! `object::Endianness`; the class is a compile-time parameter so that symbol
//! values and sizes are stored at their native width.

use crate::error::Result;
use anyhow::anyhow;
use object::Endianness;
use object::U16;
use object::U32;
use object::U64;

/// An address-sized integer for a particular ELF class. Arithmetic is done in
/// `u64` and truncated back, which preserves 32-bit wraparound for ELFCLASS32.
pub trait ElfWord:
    Copy + Default + Eq + Ord + Send + Sync + std::fmt::Debug + std::fmt::Display + std::fmt::LowerHex + 'static
{
    fn from_u64(value: u64) -> Self;
    fn to_u64(self) -> u64;
}

impl ElfWord for u32 {
    fn from_u64(value: u64) -> Self {
        value as u32
    }

    fn to_u64(self) -> u64 {
        u64::from(self)
    }
}

impl ElfWord for u64 {
    fn from_u64(value: u64) -> Self {
        value
    }

    fn to_u64(self) -> u64 {
        self
    }
}

/// One of the two ELF classes. The symbol table is generic over this; the
/// driver picks an instantiation from the first input and keeps it for the
/// rest of the link.
pub trait ElfClass: Copy + Clone + PartialEq + Eq + Send + Sync + std::fmt::Debug + 'static {
    /// Address width in bits, as reported by `Target::word_bits`.
    const WORD_BITS: u8;

    type Addr: ElfWord;

    /// The raw symbol entry for this class.
    type Sym: object::read::elf::Sym<Endian = Endianness> + object::Pod + std::fmt::Debug;

    /// Builds one symbol entry. The only place where the field widths of the
    /// two classes differ; byte order is handled by the endian-aware field
    /// types.
    fn make_sym(
        endian: Endianness,
        st_name: u32,
        st_info: u8,
        st_other: u8,
        st_shndx: u16,
        value: u64,
        size: u64,
    ) -> Self::Sym;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64;

impl ElfClass for Elf32 {
    const WORD_BITS: u8 = 32;

    type Addr = u32;
    type Sym = object::elf::Sym32<Endianness>;

    fn make_sym(
        e: Endianness,
        st_name: u32,
        st_info: u8,
        st_other: u8,
        st_shndx: u16,
        value: u64,
        size: u64,
    ) -> Self::Sym {
        object::elf::Sym32 {
            st_name: U32::new(e, st_name),
            st_value: U32::new(e, value as u32),
            st_size: U32::new(e, size as u32),
            st_info,
            st_other,
            st_shndx: U16::new(e, st_shndx),
        }
    }
}

impl ElfClass for Elf64 {
    const WORD_BITS: u8 = 64;

    type Addr = u64;
    type Sym = object::elf::Sym64<Endianness>;

    fn make_sym(
        e: Endianness,
        st_name: u32,
        st_info: u8,
        st_other: u8,
        st_shndx: u16,
        value: u64,
        size: u64,
    ) -> Self::Sym {
        object::elf::Sym64 {
            st_name: U32::new(e, st_name),
            st_info,
            st_other,
            st_shndx: U16::new(e, st_shndx),
            st_value: U64::new(e, value),
            st_size: U64::new(e, size),
        }
    }
}

pub(crate) fn sym_entry_size<C: ElfClass>() -> usize {
    size_of::<C::Sym>()
}

/// Reinterprets pre-read symbol-table bytes as raw entries.
pub(crate) fn parse_symbols<C: ElfClass>(data: &[u8], count: usize) -> Result<&[C::Sym]> {
    object::slice_from_bytes::<C::Sym>(data, count)
        .map(|(syms, _)| syms)
        .map_err(|()| anyhow!("symbol table too short for {count} entries"))
}

pub(crate) fn slice_from_all_bytes_mut<T: object::Pod>(data: &mut [u8]) -> Result<&mut [T]> {
    let count = data.len() / size_of::<T>();
    object::slice_from_bytes_mut(data, count)
        .map(|(slice, _)| slice)
        .map_err(|()| anyhow!("misaligned or undersized output buffer"))
}

pub(crate) fn st_info(binding: u8, st_type: u8) -> u8 {
    (binding << 4) | (st_type & 0xf)
}

pub(crate) fn st_other(visibility: u8, nonvis: u8) -> u8 {
    (nonvis << 2) | (visibility & 0x3)
}

/// Orders the `STV_*` constants from least to most restrictive, so that
/// visibility merging can take the maximum.
pub(crate) fn visibility_rank(visibility: u8) -> u8 {
    match visibility {
        object::elf::STV_DEFAULT => 0,
        object::elf::STV_PROTECTED => 1,
        object::elf::STV_HIDDEN => 2,
        _ => 3,
    }
}

pub(crate) fn align_offset(offset: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (offset + alignment - 1) & !(alignment - 1)
}
