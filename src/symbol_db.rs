//! The global symbol table. Ingests global symbols from each input file,
//! resolves name/version collisions, accepts linker-synthesized definitions,
//! and once layout has assigned output addresses, computes every symbol's
//! final value and writes the global portion of the output symbol table.
//!
//! Records live on an arena and are identified by `SymbolId`. The hash table
//! maps `(name_key, version_key)` to an ID; a default-versioned symbol
//! (`name@@ver`) occupies two slots that share one record. When two
//! independently-created records are later discovered to denote the same
//! symbol, one becomes a forwarder: it drops out of the hash table, and
//! holders of its ID (per-object symbol pointer arrays) reach the survivor
//! through `resolve_forwards`.

use crate::debug_assert_bail;
use crate::diagnostics::Diagnostics;
use crate::elf::ElfClass;
use crate::elf::ElfWord;
use crate::elf::align_offset;
use crate::elf::parse_symbols;
use crate::elf::slice_from_all_bytes_mut;
use crate::elf::st_info;
use crate::elf::st_other;
use crate::elf::sym_entry_size;
use crate::error::Result;
use crate::hash::PassThroughHashMap;
use crate::hash::PreHashed;
use crate::hash::hash_key_pair;
use crate::input_data::InputObject;
use crate::input_data::ObjectId;
use crate::input_data::Target;
use crate::input_data::TargetSymbol;
use crate::output::OutputAnchors;
use crate::output::OutputDataId;
use crate::output::OutputFile;
use crate::output::OutputSegmentId;
use crate::resolve::DuplicateDefinition;
use crate::resolve::resolve;
use crate::resolve::resolve_records;
use crate::string_pool::NameKey;
use crate::string_pool::NamePool;
use crate::string_pool::OutputStringPool;
use crate::symbol::RawSymbol;
use crate::symbol::SegmentOffsetBase;
use crate::symbol::Symbol;
use crate::symbol::SymbolSource;
use crate::warnings::Warnings;
use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use foldhash::HashMap;
use memchr::memchr;
use object::Endian as _;
use object::Endianness;
use object::elf::SHN_ABS;
use object::elf::SHN_COMMON;
use object::elf::SHN_LORESERVE;
use object::elf::SHN_UNDEF;
use object::elf::STB_LOCAL;
use object::elf::VER_NDX_GLOBAL;
use object::elf::VER_NDX_LOCAL;
use object::elf::VERSYM_HIDDEN;
use object::elf::VERSYM_VERSION;
use object::read::elf::Sym as _;
use std::mem::take;

/// An ID for a symbol record. IDs are indices into the record arena and stay
/// valid for the lifetime of the link, which is what lets per-object symbol
/// pointer arrays survive the aliasing of hash slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    pub(crate) fn from_usize(value: usize) -> SymbolId {
        SymbolId(u32::try_from(value).expect("Symbols overflowed 32 bits"))
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Hash-table key. The all-zero version key stands for the unversioned
/// lookup. Both halves are interning keys, so the hash is computed from them
/// directly and slot comparison never touches the string bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SymbolKey {
    name: NameKey,
    version: NameKey,
}

impl SymbolKey {
    fn prehashed(name: NameKey, version: NameKey) -> PreHashed<SymbolKey> {
        PreHashed::new(
            SymbolKey { name, version },
            hash_key_pair(name.as_u32(), version.as_u32()),
        )
    }
}

pub struct SymbolDb<'data, C: ElfClass> {
    endian: Endianness,

    diagnostics: Diagnostics,

    names: NamePool<'data>,

    /// The record arena. Never shrinks; records are only dropped with the
    /// whole table.
    symbols: Vec<Symbol<'data, C>>,

    table: PassThroughHashMap<SymbolKey, SymbolId>,

    /// Records that were merged away, mapped to their survivors. Append-only.
    forwarders: HashMap<SymbolId, SymbolId>,

    /// Records that were classified as common when first seen, in insertion
    /// order. A later definition can supersede an entry; `commons()` filters.
    commons: Vec<SymbolId>,

    /// Counts transitions into the undefined state. Drives the archive-group
    /// fixpoint in the driver.
    saw_undefined: usize,

    warnings: Warnings<'data>,

    inputs: Vec<&'data dyn InputObject<'data>>,

    anchors: OutputAnchors,

    /// IDs in emission order, recorded by `finalize` and replayed verbatim by
    /// `write_globals`.
    emit_order: Vec<SymbolId>,

    offset: u64,

    finalized: bool,
}

impl<'data, C: ElfClass> SymbolDb<'data, C> {
    pub fn new(endian: Endianness, diagnostics: Diagnostics) -> Self {
        Self {
            endian,
            diagnostics,
            names: NamePool::new(),
            symbols: Vec::new(),
            table: PassThroughHashMap::default(),
            forwarders: HashMap::default(),
            commons: Vec::new(),
            saw_undefined: 0,
            warnings: Warnings::default(),
            inputs: Vec::new(),
            anchors: OutputAnchors::default(),
            emit_order: Vec::new(),
            offset: 0,
            finalized: false,
        }
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Registers an input object. All symbol ingestion refers to objects by
    /// the returned ID. Word size and byte order must agree with the first
    /// input that selected this instantiation.
    pub fn add_object(&mut self, object: &'data dyn InputObject<'data>) -> Result<ObjectId> {
        let target = object.target();
        if target.word_bits() != C::WORD_BITS {
            bail!("{}: mixing 32-bit and 64-bit ELF objects", object.name());
        }
        if target.is_big_endian() != self.endian.is_big_endian() {
            bail!(
                "{}: mixing little-endian and big-endian ELF objects",
                object.name()
            );
        }
        let id = ObjectId::from_usize(self.inputs.len());
        self.inputs.push(object);
        Ok(id)
    }

    pub fn input(&self, id: ObjectId) -> &'data dyn InputObject<'data> {
        self.inputs[id.as_usize()]
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol<'data, C> {
        &self.symbols[id.as_usize()]
    }

    /// Mutable access for state owned by later passes, e.g. GOT offset
    /// assignment during relocation processing.
    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol<'data, C> {
        &mut self.symbols[id.as_usize()]
    }

    /// Adds all global symbols of a relocatable object.
    ///
    /// `symbols` holds `count` raw symbol entries and `strtab` the associated
    /// string table, both pre-read by the caller. `out_pointers` (length
    /// `count`) receives the canonical record for each input symbol index, so
    /// that relocation processing can map the object's symbol indices back to
    /// records; locals and factory-rejected symbols get `None`. A forwarder
    /// may legally end up in this array.
    pub fn add_from_relocatable_object(
        &mut self,
        object: ObjectId,
        symbols: &'data [u8],
        count: usize,
        strtab: &'data [u8],
        out_pointers: &mut [Option<SymbolId>],
    ) -> Result {
        debug_assert_bail!(
            out_pointers.len() == count,
            "out_pointers length {} doesn't match symbol count {count}",
            out_pointers.len()
        );
        let e = self.endian;
        let syms = parse_symbols::<C>(symbols, count)
            .with_context(|| format!("In {}", self.input(object).name()))?;

        for (i, sym) in syms.iter().enumerate() {
            if sym.st_bind() == STB_LOCAL {
                out_pointers[i] = None;
                continue;
            }

            let name = self.symbol_name(object, strtab, sym.st_name(e), i)?;
            let mut raw = RawSymbol::parse::<C>(sym, e);

            // A symbol defined in a section which we are not including must
            // be treated as an undefined symbol.
            if raw.shndx != SHN_UNDEF
                && raw.shndx < SHN_LORESERVE
                && !self.input(object).is_section_included(raw.shndx)
            {
                raw = raw.with_shndx(SHN_UNDEF);
            }

            out_pointers[i] = self.add_named(object, name, &raw)?;
        }
        Ok(())
    }

    /// Adds all symbols of a dynamic object. `versym`, if present, is the raw
    /// `.gnu.version` table and `version_map` maps version indices to version
    /// names (with unused slots `None`).
    pub fn add_from_dynamic_object(
        &mut self,
        object: ObjectId,
        symbols: &'data [u8],
        count: usize,
        strtab: &'data [u8],
        versym: Option<&'data [u8]>,
        version_map: &[Option<&'data [u8]>],
    ) -> Result {
        let e = self.endian;
        let syms = parse_symbols::<C>(symbols, count)
            .with_context(|| format!("In {}", self.input(object).name()))?;

        let versyms: Option<&[object::elf::Versym<Endianness>]> = versym
            .map(|data| {
                object::slice_from_bytes(data, count)
                    .map(|(slice, _)| slice)
                    .map_err(|()| anyhow!("{}: too few symbol versions", self.input(object).name()))
            })
            .transpose()?;

        for (i, sym) in syms.iter().enumerate() {
            // Ignore symbols with local binding.
            if sym.st_bind() == STB_LOCAL {
                continue;
            }

            let name = self.symbol_name(object, strtab, sym.st_name(e), i)?;
            let raw = RawSymbol::parse::<C>(sym, e);

            let Some(versyms) = versyms else {
                let (name, name_key) = self.names.intern(name);
                self.add_from_object(object, name, name_key, None, false, &raw)?;
                continue;
            };

            let v = versyms[i].0.get(e);
            let hidden = v & VERSYM_HIDDEN != 0;
            let v = v & VERSYM_VERSION;

            if v == VER_NDX_LOCAL {
                // This symbol should not be visible outside the object.
                continue;
            }

            let (name, name_key) = self.names.intern(name);

            if v == VER_NDX_GLOBAL {
                // This symbol does not have a version.
                self.add_from_object(object, name, name_key, None, false, &raw)?;
                continue;
            }

            let Some(&slot) = version_map.get(usize::from(v)) else {
                bail!(
                    "{}: versym for symbol {i} out of range: {v}",
                    self.input(object).name()
                );
            };
            let Some(version) = slot else {
                bail!(
                    "{}: versym for symbol {i} has no name: {v}",
                    self.input(object).name()
                );
            };
            let (version, version_key) = self.names.intern(version);

            // An absolute symbol whose name equals its version name is the
            // version definition marker itself; don't record a version for
            // it.
            if raw.shndx == SHN_ABS && name_key == version_key {
                self.add_from_object(object, name, name_key, None, false, &raw)?;
                continue;
            }

            let default = !hidden && raw.shndx != SHN_UNDEF;
            self.add_from_object(object, name, name_key, Some((version, version_key)), default, &raw)?;
        }
        Ok(())
    }

    fn symbol_name(
        &self,
        object: ObjectId,
        strtab: &'data [u8],
        st_name: u32,
        index: usize,
    ) -> Result<&'data [u8]> {
        let st_name = st_name as usize;
        if st_name >= strtab.len() {
            bail!(
                "{}: bad symbol name offset 0x{st_name:x} at symbol {index}",
                self.input(object).name()
            );
        }
        let tail = &strtab[st_name..];
        let Some(len) = memchr(0, tail) else {
            bail!(
                "{}: unterminated symbol name at offset 0x{st_name:x}",
                self.input(object).name()
            );
        };
        Ok(&tail[..len])
    }

    /// Splits `name`, `name@ver` or `name@@ver` and performs the insertion.
    fn add_named(
        &mut self,
        object: ObjectId,
        name: &'data [u8],
        raw: &RawSymbol,
    ) -> Result<Option<SymbolId>> {
        if let Some(at) = memchr(b'@', name) {
            let (version, default) = if name[at..].starts_with(b"@@") {
                (&name[at + 2..], true)
            } else {
                (&name[at + 1..], false)
            };
            let (name, name_key) = self.names.intern_prefix(name, at);
            let (version, version_key) = self.names.intern(version);
            self.add_from_object(object, name, name_key, Some((version, version_key)), default, raw)
        } else {
            let (name, name_key) = self.names.intern(name);
            self.add_from_object(object, name, name_key, None, false, raw)
        }
    }

    /// Adds one symbol observed in `object`. `name` and `version` are
    /// canonical. `default` marks the `name@@version` form: from now on,
    /// lookups of the bare name and of the versioned name must land on the
    /// same record, including the case where both already exist as
    /// independent records, which is what the forwarder mechanism is for.
    ///
    /// Returns `None` when a target factory declines the symbol.
    fn add_from_object(
        &mut self,
        object: ObjectId,
        name: &'data [u8],
        name_key: NameKey,
        version: Option<(&'data [u8], NameKey)>,
        default: bool,
        raw: &RawSymbol,
    ) -> Result<Option<SymbolId>> {
        let version_key = version.map_or(NameKey::NONE, |(_, key)| key);
        let key = SymbolKey::prehashed(name_key, version_key);
        let unversioned = SymbolKey::prehashed(name_key, NameKey::NONE);
        let from_is_dynamic = self.input(object).is_dynamic();

        let id;
        let was_undefined;
        let was_common;

        if let Some(&found) = self.table.get(&key) {
            // We already have an entry for NAME/VERSION.
            id = found;
            was_undefined = self.symbols[id.as_usize()].is_undefined();
            was_common = self.symbols[id.as_usize()].is_common();
            self.resolve_into(id, raw, object, from_is_dynamic)?;

            if default && !version_key.is_none() {
                match self.table.get(&unversioned).copied() {
                    None => {
                        // First time we've seen the bare name: share the
                        // versioned record.
                        self.table.insert(unversioned, id);
                    }
                    Some(other) if other != id => {
                        self.merge_aliased_records(id, other)?;
                        self.table.insert(unversioned, id);
                    }
                    Some(_) => {}
                }
            }
        } else if default && !version_key.is_none() && self.table.contains_key(&unversioned) {
            // First time we've seen NAME/VERSION, but the bare name already
            // has a record: the versioned lookup aliases it.
            id = self.table[&unversioned];
            was_undefined = self.symbols[id.as_usize()].is_undefined();
            was_common = self.symbols[id.as_usize()].is_common();
            self.resolve_into(id, raw, object, from_is_dynamic)?;
            self.table.insert(key, id);
        } else {
            // A fresh record, via the generic constructor or the target
            // factory.
            let target = self.input(object).target();
            let special = if target.has_make_symbol() {
                match target.make_symbol(name) {
                    // The target doesn't want a symbol table entry after all.
                    None => return Ok(None),
                    Some(TargetSymbol::Special) => true,
                    Some(TargetSymbol::Plain) => false,
                }
            } else {
                false
            };

            let sym = Symbol::from_object(name, name_key, version, object, from_is_dynamic, special, raw);
            id = self.push_record(sym);
            self.table.insert(key, id);
            if default && !version_key.is_none() {
                self.table.insert(unversioned, id);
            }
            was_undefined = false;
            was_common = false;
        }

        // Record transitions into the undefined state (drives archive
        // groups) and into the common class (drives common allocation).
        let sym = &self.symbols[id.as_usize()];
        if !was_undefined && sym.is_undefined() {
            self.saw_undefined += 1;
        }
        if !was_common && sym.is_common() {
            self.commons.push(id);
        }

        Ok(Some(id))
    }

    fn push_record(&mut self, sym: Symbol<'data, C>) -> SymbolId {
        let id = SymbolId::from_usize(self.symbols.len());
        self.symbols.push(sym);
        id
    }

    /// Resolves an incoming ELF symbol into the record `id`.
    fn resolve_into(
        &mut self,
        id: SymbolId,
        raw: &RawSymbol,
        object: ObjectId,
        from_is_dynamic: bool,
    ) -> Result {
        let to_is_dynamic = self.is_dynamic_definition(id);
        let existing_location = self.definition_location(id);
        let name = self.symbols[id.as_usize()].name();
        resolve(&mut self.symbols[id.as_usize()], raw, object, from_is_dynamic, to_is_dynamic)
            .map_err(|DuplicateDefinition| {
                anyhow!(
                    "multiple definition of `{}`: in {} and {}",
                    self.diagnostics.symbol_display(name),
                    existing_location,
                    self.input(object).name()
                )
            })
    }

    /// We have independent records for NAME/VERSION (`keep`) and NAME/NULL
    /// (`other`), and just learned that VERSION is the default version, so
    /// they denote the same symbol. Merge `other` into `keep` and turn
    /// `other` into a forwarder.
    fn merge_aliased_records(&mut self, keep: SymbolId, other: SymbolId) -> Result {
        let keep_is_dynamic = self.is_dynamic_definition(keep);
        let other_is_dynamic = self.is_dynamic_definition(other);
        let keep_location = self.definition_location(keep);
        let other_location = self.definition_location(other);
        let name = self.symbols[keep.as_usize()].name();

        let (keep_sym, other_sym) = two_records(&mut self.symbols, keep, other);
        resolve_records(keep_sym, other_sym, other_is_dynamic, keep_is_dynamic).map_err(
            |DuplicateDefinition| {
                anyhow!(
                    "multiple definition of `{}`: in {keep_location} and {other_location}",
                    self.diagnostics.symbol_display(name),
                )
            },
        )?;
        self.make_forwarder(other, keep)
    }

    fn is_dynamic_definition(&self, id: SymbolId) -> bool {
        self.symbols[id.as_usize()]
            .object()
            .is_some_and(|object| self.input(object).is_dynamic())
    }

    fn definition_location(&self, id: SymbolId) -> String {
        match self.symbols[id.as_usize()].object() {
            Some(object) => self.input(object).name().to_owned(),
            None => "linker-defined symbol".to_owned(),
        }
    }

    fn make_forwarder(&mut self, from: SymbolId, to: SymbolId) -> Result {
        debug_assert_bail!(from != to, "attempted to forward symbol {from} to itself");
        debug_assert_bail!(
            !self.symbols[from.as_usize()].is_forwarder()
                && !self.symbols[to.as_usize()].is_forwarder(),
            "attempted to forward an existing forwarder"
        );
        self.symbols[from.as_usize()].set_forwarder();
        self.forwarders.insert(from, to);
        Ok(())
    }

    /// Follows forwarders to the surviving record. Forwarding can chain when
    /// a record that previously survived a merge is itself merged away later.
    pub fn resolve_forwards(&self, id: SymbolId) -> SymbolId {
        let mut id = id;
        while self.symbols[id.as_usize()].is_forwarder() {
            id = self.forwarders[&id];
        }
        id
    }

    /// Non-inserting lookup. Never returns a forwarder.
    pub fn lookup(&self, name: &[u8], version: Option<&[u8]>) -> Option<SymbolId> {
        let (_, name_key) = self.names.find(name)?;
        let version_key = match version {
            None => NameKey::NONE,
            Some(version) => self.names.find(version)?.1,
        };
        self.table
            .get(&SymbolKey::prehashed(name_key, version_key))
            .copied()
    }

    /// Finds or creates the record for a linker-defined symbol.
    ///
    /// With `only_if_ref`, only an existing undefined record qualifies;
    /// otherwise the symbol is created if missing, and colliding with a real
    /// definition from a regular object is an error.
    fn define_special_symbol(
        &mut self,
        target: &dyn Target,
        name: &'data [u8],
        only_if_ref: bool,
    ) -> Result<Option<SymbolId>> {
        debug_assert_bail!(
            target.word_bits() == C::WORD_BITS,
            "target word size mismatch for linker-defined `{}`",
            self.diagnostics.symbol_display(name)
        );

        if only_if_ref {
            let Some(id) = self.lookup(name, None) else {
                return Ok(None);
            };
            if !self.symbols[id.as_usize()].is_undefined() {
                return Ok(None);
            }
            // Our new definition overrides the old reference.
            return Ok(Some(id));
        }

        let (name, name_key) = self.names.intern(name);
        let key = SymbolKey::prehashed(name_key, NameKey::NONE);

        if let Some(&id) = self.table.get(&key) {
            // Taking over a reference, a common or a dynamic definition is
            // fine; anything else is a collision.
            let real_definition = match self.symbols[id.as_usize()].source() {
                SymbolSource::FromObject { object, shndx } => {
                    shndx != SHN_UNDEF && shndx != SHN_COMMON && !self.input(object).is_dynamic()
                }
                _ => true,
            };
            if real_definition {
                bail!(
                    "multiple definition of `{}`: linker-defined symbol collides with {}",
                    self.diagnostics.symbol_display(name),
                    self.definition_location(id)
                );
            }
            return Ok(Some(id));
        }

        let special = if target.has_make_symbol() {
            match target.make_symbol(name) {
                None => return Ok(None),
                Some(TargetSymbol::Special) => true,
                Some(TargetSymbol::Plain) => false,
            }
        } else {
            false
        };
        let id = self.push_record(Symbol::placeholder(name, name_key, special));
        self.table.insert(key, id);
        Ok(Some(id))
    }

    /// Defines a symbol whose value is an offset into a linker-generated
    /// output data blob (from its end, if `offset_is_from_end`).
    #[allow(clippy::too_many_arguments)]
    pub fn define_in_output_data(
        &mut self,
        target: &dyn Target,
        name: &'data [u8],
        data: OutputDataId,
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
        offset_is_from_end: bool,
        only_if_ref: bool,
    ) -> Result<Option<SymbolId>> {
        let Some(id) = self.define_special_symbol(target, name, only_if_ref)? else {
            return Ok(None);
        };
        self.symbols[id.as_usize()].init_in_output_data(
            data,
            value,
            symsize,
            st_type,
            binding,
            visibility,
            nonvis,
            offset_is_from_end,
        );
        Ok(Some(id))
    }

    /// Defines a symbol relative to an output segment.
    #[allow(clippy::too_many_arguments)]
    pub fn define_in_output_segment(
        &mut self,
        target: &dyn Target,
        name: &'data [u8],
        segment: OutputSegmentId,
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
        base: SegmentOffsetBase,
        only_if_ref: bool,
    ) -> Result<Option<SymbolId>> {
        let Some(id) = self.define_special_symbol(target, name, only_if_ref)? else {
            return Ok(None);
        };
        self.symbols[id.as_usize()].init_in_output_segment(
            segment, value, symsize, st_type, binding, visibility, nonvis, base,
        );
        Ok(Some(id))
    }

    /// Defines a symbol with an absolute constant value.
    #[allow(clippy::too_many_arguments)]
    pub fn define_as_constant(
        &mut self,
        target: &dyn Target,
        name: &'data [u8],
        value: u64,
        symsize: u64,
        st_type: u8,
        binding: u8,
        visibility: u8,
        nonvis: u8,
        only_if_ref: bool,
    ) -> Result<Option<SymbolId>> {
        let Some(id) = self.define_special_symbol(target, name, only_if_ref)? else {
            return Ok(None);
        };
        self.symbols[id.as_usize()].init_constant(value, symsize, st_type, binding, visibility, nonvis);
        Ok(Some(id))
    }

    /// Associates warning text (the contents of `shndx` in `object`) with a
    /// symbol name.
    pub fn add_warning(&mut self, name: &'data [u8], object: ObjectId, shndx: u16) {
        let (name, _) = self.names.intern(name);
        self.warnings.add(name, object, shndx);
    }

    /// Called by relocation processing when it sees a reference to a symbol
    /// with the warning flag. Lock-free: the text was frozen during
    /// finalization.
    pub fn issue_warning(&self, id: SymbolId, location: &str) {
        let sym = &self.symbols[id.as_usize()];
        debug_assert!(sym.has_warning());
        if let Some(text) = self.warnings.text_for(sym.name()) {
            self.diagnostics
                .warning(location, &crate::warnings::display_text(text));
        }
    }

    /// The number of add operations that transitioned their record from
    /// not-undefined to undefined.
    pub fn saw_undefined_count(&self) -> usize {
        self.saw_undefined
    }

    /// Records currently classified as common, in first-seen order.
    pub fn commons(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.commons
            .iter()
            .copied()
            .filter(|id| self.symbols[id.as_usize()].is_common())
    }

    pub fn anchors(&self) -> &OutputAnchors {
        &self.anchors
    }

    pub fn anchors_mut(&mut self) -> &mut OutputAnchors {
        &mut self.anchors
    }

    /// Number of symbols that will be written. Valid after `finalize`.
    pub fn output_count(&self) -> usize {
        self.emit_order.len()
    }

    /// File offset the globals will be written at. Valid after `finalize`.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Computes the final value of every record and decides which records are
    /// emitted, in what order. `offset` is the file offset at which the
    /// global symbols will be written (aligned up to the word size); the
    /// returned offset is just past them.
    ///
    /// Idempotent: the raw values the computation starts from are never
    /// overwritten.
    #[tracing::instrument(skip_all, name = "Finalize symbol table")]
    pub fn finalize(&mut self, offset: u64, pool: &mut OutputStringPool<'data>) -> Result<u64> {
        let entry_size = sym_entry_size::<C>() as u64;
        let mut offset = align_offset(offset, u64::from(C::WORD_BITS / 8));
        self.offset = offset;
        self.emit_order.clear();

        for index in 0..self.symbols.len() {
            let sym = &self.symbols[index];
            if sym.is_forwarder() {
                continue;
            }

            let value = match sym.source() {
                SymbolSource::FromObject { object, shndx } => {
                    if shndx >= SHN_LORESERVE && shndx != SHN_ABS {
                        bail!(
                            "{}: unsupported symbol section 0x{shndx:x} for `{}`",
                            self.input(object).name(),
                            self.diagnostics.symbol_display(sym.name())
                        );
                    }
                    if self.input(object).is_dynamic() {
                        // Emitted as an undefined reference to the runtime
                        // definition.
                        0
                    } else if shndx == SHN_UNDEF {
                        0
                    } else if shndx == SHN_ABS {
                        sym.value().to_u64()
                    } else {
                        match self.input(object).output_section(shndx) {
                            // The section was discarded; the record is not
                            // emitted.
                            None => continue,
                            Some((section, section_offset)) => sym
                                .value()
                                .to_u64()
                                .wrapping_add(section.address)
                                .wrapping_add(section_offset),
                        }
                    }
                }
                SymbolSource::InOutputData {
                    data,
                    offset_is_from_end,
                } => {
                    let mut value = sym.value().to_u64().wrapping_add(self.anchors.data_address(data));
                    if offset_is_from_end {
                        value = value.wrapping_add(self.anchors.data_size(data));
                    }
                    value
                }
                SymbolSource::InOutputSegment { segment, base } => {
                    let value = sym
                        .value()
                        .to_u64()
                        .wrapping_add(self.anchors.segment_vaddr(segment));
                    match base {
                        SegmentOffsetBase::SegmentStart => value,
                        SegmentOffsetBase::SegmentEnd => {
                            value.wrapping_add(self.anchors.segment_memsz(segment))
                        }
                        SegmentOffsetBase::SegmentBss => {
                            value.wrapping_add(self.anchors.segment_filesz(segment))
                        }
                    }
                }
                SymbolSource::Constant => sym.value().to_u64(),
            };

            self.symbols[index].set_final_value(C::Addr::from_u64(value));
            pool.add(self.symbols[index].name());
            self.emit_order.push(SymbolId::from_usize(index));
            offset += entry_size;
        }

        // Now that we have the final symbol table, we can reliably note which
        // symbols should get warnings.
        self.note_warnings()?;

        self.finalized = true;
        Ok(offset)
    }

    /// Marks the records that warnings apply to and captures the warning
    /// text. The text must be frozen here: warnings fire during relocation
    /// processing, where taking the object lock per reference isn't an
    /// option.
    fn note_warnings(&mut self) -> Result {
        let mut table = take(&mut self.warnings.table);
        for (name, entry) in table.iter_mut() {
            let Some(id) = self.lookup(name, None) else {
                continue;
            };
            if self.symbols[id.as_usize()].object() != Some(entry.object) {
                continue;
            }
            let text = self
                .input(entry.object)
                .section_contents(entry.shndx)
                .with_context(|| {
                    format!(
                        "Failed to read warning text from {}",
                        self.input(entry.object).name()
                    )
                })?;
            entry.text = Some(text);
            self.symbols[id.as_usize()].set_has_warning();
        }
        self.warnings.table = table;
        Ok(())
    }

    /// Serializes the global symbols at the offset recorded by `finalize`,
    /// in the same order.
    #[tracing::instrument(skip_all, name = "Write global symbols")]
    pub fn write_globals(&self, pool: &OutputStringPool<'data>, out: &mut OutputFile) -> Result {
        debug_assert_bail!(self.finalized, "write_globals called before finalize");
        let e = self.endian;
        let view = out.view(self.offset, self.emit_order.len() * sym_entry_size::<C>())?;
        let entries: &mut [C::Sym] = slice_from_all_bytes_mut(view)?;

        for (entry, &id) in entries.iter_mut().zip(&self.emit_order) {
            let sym = &self.symbols[id.as_usize()];

            let shndx = match sym.source() {
                SymbolSource::FromObject { object, shndx } => {
                    if self.input(object).is_dynamic() {
                        SHN_UNDEF
                    } else if shndx == SHN_UNDEF || shndx == SHN_ABS {
                        shndx
                    } else {
                        let Some((section, _)) = self.input(object).output_section(shndx) else {
                            bail!(
                                "symbol `{}` lost its output section between finalize and write",
                                self.diagnostics.symbol_display(sym.name())
                            );
                        };
                        section.out_shndx
                    }
                }
                SymbolSource::InOutputData { data, .. } => self.anchors.data_shndx(data),
                SymbolSource::InOutputSegment { .. } | SymbolSource::Constant => SHN_ABS,
            };

            let st_name = pool.get_offset(sym.name()).with_context(|| {
                format!(
                    "symbol `{}` missing from the output string pool",
                    self.diagnostics.symbol_display(sym.name())
                )
            })?;

            *entry = C::make_sym(
                e,
                st_name,
                st_info(sym.binding(), sym.st_type()),
                st_other(sym.visibility(), sym.nonvis()),
                shndx,
                sym.final_value().to_u64(),
                sym.symsize().to_u64(),
            );
        }
        Ok(())
    }

    /// IDs of the records reachable through the hash table.
    #[cfg(test)]
    pub(crate) fn reachable_ids(&self) -> Vec<SymbolId> {
        let mut ids: Vec<SymbolId> = self.table.values().copied().collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

fn two_records<'a, 'data, C: ElfClass>(
    symbols: &'a mut [Symbol<'data, C>],
    to: SymbolId,
    from: SymbolId,
) -> (&'a mut Symbol<'data, C>, &'a Symbol<'data, C>) {
    let (to, from) = (to.as_usize(), from.as_usize());
    debug_assert_ne!(to, from);
    if to < from {
        let (left, right) = symbols.split_at_mut(from);
        (&mut left[to], &right[0])
    } else {
        let (left, right) = symbols.split_at_mut(to);
        (&mut right[0], &left[from])
    }
}
