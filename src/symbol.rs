//! The per-symbol record. Records live on the symbol table's arena and are
//! identified by `SymbolId`; everything else (hash slots, per-object pointer
//! arrays, the forwarder map) refers to them by that index.

use crate::elf::ElfClass;
use crate::elf::ElfWord;
use crate::elf::visibility_rank;
use crate::input_data::ObjectId;
use crate::output::OutputDataId;
use crate::output::OutputSegmentId;
use crate::string_pool::NameKey;
use bitflags::bitflags;
use object::Endianness;
use object::read::elf::Sym as _;

bitflags! {
    /// State bits for a symbol record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymFlags: u16 {
        /// The record was produced by a target-specific factory.
        const TARGET_SPECIAL = 1 << 0;

        /// The record currently carries a definition.
        const DEF = 1 << 1;

        /// The record has been superseded; holders of its identity must go
        /// through the forwarder map. Never set on records reachable from the
        /// hash table.
        const FORWARDER = 1 << 2;

        /// The symbol was seen in a dynamic object.
        const IN_DYN = 1 << 3;

        /// `got_offset` is meaningful.
        const HAS_GOT_OFFSET = 1 << 4;

        /// A warning is associated with this symbol; references to it should
        /// call `SymbolDb::issue_warning`.
        const HAS_WARNING = 1 << 5;
    }
}

/// Which part of an output segment a segment-anchored symbol is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOffsetBase {
    SegmentStart,
    SegmentEnd,

    /// The start of the BSS portion of the segment, i.e. `vaddr + filesz`.
    SegmentBss,
}

/// Where a symbol's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSource {
    /// Defined by (or undefined in) an input object. `shndx` may be
    /// `SHN_UNDEF`, `SHN_ABS`, `SHN_COMMON` or a real section index in that
    /// object.
    FromObject { object: ObjectId, shndx: u16 },

    /// Linker-defined, anchored to an output data blob; the value is an
    /// offset within it.
    InOutputData {
        data: OutputDataId,
        offset_is_from_end: bool,
    },

    /// Linker-defined, anchored to an output segment.
    InOutputSegment {
        segment: OutputSegmentId,
        base: SegmentOffsetBase,
    },

    /// Linker-defined absolute constant; the value is final.
    Constant,
}

/// A class- and endian-independent view of one ELF symbol entry. Ingestion
/// parses each raw entry into this, and the resolver reconstructs one from an
/// already-stored record when two records are discovered to denote the same
/// symbol.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawSymbol {
    pub(crate) st_type: u8,
    pub(crate) binding: u8,
    pub(crate) visibility: u8,
    pub(crate) nonvis: u8,
    pub(crate) shndx: u16,
    pub(crate) value: u64,
    pub(crate) size: u64,
}

impl RawSymbol {
    pub(crate) fn parse<C: ElfClass>(sym: &C::Sym, e: Endianness) -> RawSymbol {
        RawSymbol {
            st_type: sym.st_type(),
            binding: sym.st_bind(),
            visibility: sym.st_visibility(),
            nonvis: sym.st_other() >> 2,
            shndx: sym.st_shndx(e),
            value: sym.st_value(e).into(),
            size: sym.st_size(e).into(),
        }
    }

    pub(crate) fn with_shndx(self, shndx: u16) -> RawSymbol {
        RawSymbol { shndx, ..self }
    }

    pub(crate) fn from_symbol<C: ElfClass>(sym: &Symbol<'_, C>) -> RawSymbol {
        let shndx = match sym.source {
            SymbolSource::FromObject { shndx, .. } => shndx,
            // Linker-defined sources behave like absolute definitions for
            // merging purposes.
            _ => object::elf::SHN_ABS,
        };
        RawSymbol {
            st_type: sym.st_type,
            binding: sym.binding,
            visibility: sym.visibility,
            nonvis: sym.nonvis,
            shndx,
            value: sym.value.to_u64(),
            size: sym.symsize.to_u64(),
        }
    }
}

/// A global (or weak) symbol record. The name and version, once set, never
/// change, so the table key for a record is stable for its lifetime.
pub struct Symbol<'data, C: ElfClass> {
    name: &'data [u8],
    name_key: NameKey,
    version: Option<&'data [u8]>,
    version_key: NameKey,
    st_type: u8,
    binding: u8,
    visibility: u8,
    nonvis: u8,
    flags: SymFlags,
    got_offset: u64,
    source: SymbolSource,
    value: C::Addr,
    symsize: C::Addr,

    /// The runtime value computed by finalization. Kept separate from `value`
    /// so that finalizing twice yields the same result.
    final_value: Option<C::Addr>,
}

impl<'data, C: ElfClass> Symbol<'data, C> {
    pub(crate) fn from_object(
        name: &'data [u8],
        name_key: NameKey,
        version: Option<(&'data [u8], NameKey)>,
        object: ObjectId,
        object_is_dynamic: bool,
        special: bool,
        raw: &RawSymbol,
    ) -> Self {
        let mut flags = SymFlags::empty();
        if object_is_dynamic {
            flags |= SymFlags::IN_DYN;
        }
        if special {
            flags |= SymFlags::TARGET_SPECIAL;
        }
        let mut sym = Symbol {
            name,
            name_key,
            version: version.map(|(bytes, _)| bytes),
            version_key: version.map_or(NameKey::NONE, |(_, key)| key),
            st_type: raw.st_type,
            binding: raw.binding,
            visibility: raw.visibility,
            nonvis: raw.nonvis,
            flags,
            got_offset: 0,
            source: SymbolSource::FromObject {
                object,
                shndx: raw.shndx,
            },
            value: C::Addr::from_u64(raw.value),
            symsize: C::Addr::from_u64(raw.size),
            final_value: None,
        };
        sym.update_def_flag();
        sym
    }

    /// A fresh record for a linker-defined symbol. The caller follows up with
    /// one of the `init_*` methods.
    pub(crate) fn placeholder(name: &'data [u8], name_key: NameKey, special: bool) -> Self {
        Symbol {
            name,
            name_key,
            version: None,
            version_key: NameKey::NONE,
            st_type: object::elf::STT_NOTYPE,
            binding: object::elf::STB_GLOBAL,
            visibility: object::elf::STV_DEFAULT,
            nonvis: 0,
            flags: if special {
                SymFlags::TARGET_SPECIAL
            } else {
                SymFlags::empty()
            },
            got_offset: 0,
            source: SymbolSource::Constant,
            value: C::Addr::default(),
            symsize: C::Addr::default(),
            final_value: None,
        }
    }

    pub fn name(&self) -> &'data [u8] {
        self.name
    }

    pub fn name_key(&self) -> NameKey {
        self.name_key
    }

    pub fn version(&self) -> Option<&'data [u8]> {
        self.version
    }

    /// The interned version key; `NameKey::NONE` for unversioned symbols.
    pub fn version_key(&self) -> NameKey {
        self.version_key
    }

    pub fn st_type(&self) -> u8 {
        self.st_type
    }

    pub fn binding(&self) -> u8 {
        self.binding
    }

    pub fn visibility(&self) -> u8 {
        self.visibility
    }

    pub fn nonvis(&self) -> u8 {
        self.nonvis
    }

    pub fn flags(&self) -> SymFlags {
        self.flags
    }

    pub fn source(&self) -> SymbolSource {
        self.source
    }

    /// The raw value: a section offset, alignment (for commons) or constant,
    /// depending on `source`.
    pub fn value(&self) -> C::Addr {
        self.value
    }

    pub fn symsize(&self) -> C::Addr {
        self.symsize
    }

    /// The runtime value. Only available once finalization has run.
    pub fn final_value(&self) -> C::Addr {
        self.final_value
            .expect("symbol value read before the finalize pass")
    }

    pub(crate) fn set_final_value(&mut self, value: C::Addr) {
        self.final_value = Some(value);
    }

    pub fn object(&self) -> Option<ObjectId> {
        match self.source {
            SymbolSource::FromObject { object, .. } => Some(object),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(
            self.source,
            SymbolSource::FromObject {
                shndx: object::elf::SHN_UNDEF,
                ..
            }
        )
    }

    pub fn is_common(&self) -> bool {
        self.st_type == object::elf::STT_COMMON
            || matches!(
                self.source,
                SymbolSource::FromObject {
                    shndx: object::elf::SHN_COMMON,
                    ..
                }
            )
    }

    pub fn is_weak(&self) -> bool {
        self.binding == object::elf::STB_WEAK
    }

    pub fn is_forwarder(&self) -> bool {
        self.flags.contains(SymFlags::FORWARDER)
    }

    pub(crate) fn set_forwarder(&mut self) {
        self.flags |= SymFlags::FORWARDER;
    }

    pub fn in_dyn(&self) -> bool {
        self.flags.contains(SymFlags::IN_DYN)
    }

    pub(crate) fn set_in_dyn(&mut self) {
        self.flags |= SymFlags::IN_DYN;
    }

    pub fn has_warning(&self) -> bool {
        self.flags.contains(SymFlags::HAS_WARNING)
    }

    pub(crate) fn set_has_warning(&mut self) {
        self.flags |= SymFlags::HAS_WARNING;
    }

    pub fn has_got_offset(&self) -> bool {
        self.flags.contains(SymFlags::HAS_GOT_OFFSET)
    }

    pub fn got_offset(&self) -> u64 {
        assert!(self.has_got_offset(), "GOT offset read before assignment");
        self.got_offset
    }

    pub fn set_got_offset(&mut self, offset: u64) {
        self.got_offset = offset;
        self.flags |= SymFlags::HAS_GOT_OFFSET;
    }

    /// Narrows visibility to the more restrictive of the current value and
    /// `visibility`.
    pub(crate) fn merge_visibility(&mut self, visibility: u8) {
        if visibility_rank(visibility) > visibility_rank(self.visibility) {
            self.visibility = visibility;
        }
    }

    pub(crate) fn set_binding(&mut self, binding: u8) {
        self.binding = binding;
    }

    /// Replaces this record's definition with `raw` from `object`.
    /// Visibility is not copied; the caller merges it separately.
    pub(crate) fn adopt_definition(&mut self, raw: &RawSymbol, object: ObjectId) {
        self.st_type = raw.st_type;
        self.binding = raw.binding;
        self.nonvis = raw.nonvis;
        self.source = SymbolSource::FromObject {
            object,
            shndx: raw.shndx,
        };
        self.value = C::Addr::from_u64(raw.value);
        self.symsize = C::Addr::from_u64(raw.size);
        self.update_def_flag();
    }

    /// Replaces this record's definition with the one carried by `other`,
    /// source and all. Used when merging two records that turned out to
    /// denote the same symbol.
    pub(crate) fn adopt_record(&mut self, other: &Symbol<'data, C>) {
        self.st_type = other.st_type;
        self.binding = other.binding;
        self.nonvis = other.nonvis;
        self.source = other.source;
        self.value = other.value;
        self.symsize = other.symsize;
        self.update_def_flag();
    }

    /// Merges another common definition into this one: both the size and the
    /// alignment (which commons carry in their value) keep the per-side max.
    pub(crate) fn merge_common(&mut self, raw: &RawSymbol) {
        self.symsize = self.symsize.max(C::Addr::from_u64(raw.size));
        self.value = self.value.max(C::Addr::from_u64(raw.value));
    }

    pub(crate) fn init_in_output_data(
        &mut self,
        data: OutputDataId,
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
        offset_is_from_end: bool,
    ) {
        self.source = SymbolSource::InOutputData {
            data,
            offset_is_from_end,
        };
        self.init_linker_defined(value, symsize, st_type, binding, visibility, nonvis);
    }

    pub(crate) fn init_in_output_segment(
        &mut self,
        segment: OutputSegmentId,
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
        base: SegmentOffsetBase,
    ) {
        self.source = SymbolSource::InOutputSegment { segment, base };
        self.init_linker_defined(value, symsize, st_type, binding, visibility, nonvis);
    }

    pub(crate) fn init_constant(
        &mut self,
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
    ) {
        self.source = SymbolSource::Constant;
        self.init_linker_defined(value, symsize, st_type, binding, visibility, nonvis);
    }

    fn init_linker_defined(
        &mut self,
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
    ) {
        self.value = C::Addr::from_u64(value);
        self.symsize = C::Addr::from_u64(symsize);
        self.st_type = st_type;
        self.binding = binding;
        self.visibility = visibility;
        self.nonvis = nonvis;
        self.flags = (self.flags & SymFlags::TARGET_SPECIAL) | SymFlags::DEF;
        self.final_value = None;
    }

    pub(crate) fn update_def_flag(&mut self) {
        let defined = match self.source {
            SymbolSource::FromObject { shndx, .. } => {
                shndx != object::elf::SHN_UNDEF && !self.is_common()
            }
            _ => true,
        };
        self.flags.set(SymFlags::DEF, defined);
    }
}
