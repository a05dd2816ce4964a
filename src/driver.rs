//! Class and endian dispatch. The symbol table proper is generic over the
//! ELF class; the first input observed decides which instantiation (and which
//! byte order) handles the rest of the link. Also provides the parallel
//! ingestion entry point: worker threads prepare pre-read inputs while every
//! call into the table itself is serialized by a single lock.

use crate::diagnostics::Diagnostics;
use crate::elf::Elf32;
use crate::elf::Elf64;
use crate::error::Error;
use crate::error::Result;
use crate::input_data::InputObject;
use crate::input_data::ObjectId;
use crate::input_data::Target;
use crate::output::OutputAnchors;
use crate::output::OutputFile;
use crate::string_pool::OutputStringPool;
use crate::symbol::SegmentOffsetBase;
use crate::symbol_db::SymbolDb;
use crate::symbol_db::SymbolId;
use crate::output::OutputDataId;
use crate::output::OutputSegmentId;
use anyhow::bail;
use crossbeam_queue::SegQueue;
use object::Endianness;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::sync::Mutex;

/// The symbol table for a link, instantiated for whichever ELF class the
/// first input uses.
pub enum SymbolTable<'data> {
    Elf32(SymbolDb<'data, Elf32>),
    Elf64(SymbolDb<'data, Elf64>),
}

macro_rules! with_db {
    ($self:expr, $db:ident => $body:expr) => {
        match $self {
            SymbolTable::Elf32($db) => $body,
            SymbolTable::Elf64($db) => $body,
        }
    };
}

impl<'data> SymbolTable<'data> {
    /// Picks the instantiation matching the first input's target.
    pub fn for_first_input(target: &dyn Target, diagnostics: Diagnostics) -> Result<Self> {
        let endian = if target.is_big_endian() {
            Endianness::Big
        } else {
            Endianness::Little
        };
        match target.word_bits() {
            32 => Ok(SymbolTable::Elf32(SymbolDb::new(endian, diagnostics))),
            64 => Ok(SymbolTable::Elf64(SymbolDb::new(endian, diagnostics))),
            bits => bail!("unsupported ELF class: {bits}-bit"),
        }
    }

    pub fn add_object(&mut self, object: &'data dyn InputObject<'data>) -> Result<ObjectId> {
        with_db!(self, db => db.add_object(object))
    }

    pub fn add_from_relocatable_object(
        &mut self,
        object: ObjectId,
        symbols: &'data [u8],
        count: usize,
        strtab: &'data [u8],
        out_pointers: &mut [Option<SymbolId>],
    ) -> Result {
        with_db!(self, db => db.add_from_relocatable_object(object, symbols, count, strtab, out_pointers))
    }

    pub fn add_from_dynamic_object(
        &mut self,
        object: ObjectId,
        symbols: &'data [u8],
        count: usize,
        strtab: &'data [u8],
        versym: Option<&'data [u8]>,
        version_map: &[Option<&'data [u8]>],
    ) -> Result {
        with_db!(self, db => db.add_from_dynamic_object(object, symbols, count, strtab, versym, version_map))
    }

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
        with_db!(self, db => db.define_in_output_data(
            target, name, data, value, symsize, st_type, binding, visibility, nonvis,
            offset_is_from_end, only_if_ref,
        ))
    }

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
        with_db!(self, db => db.define_in_output_segment(
            target, name, segment, value, symsize, st_type, binding, visibility, nonvis, base,
            only_if_ref,
        ))
    }

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
        with_db!(self, db => db.define_as_constant(
            target, name, value, symsize, st_type, binding, visibility, nonvis, only_if_ref,
        ))
    }

    pub fn lookup(&self, name: &[u8], version: Option<&[u8]>) -> Option<SymbolId> {
        with_db!(self, db => db.lookup(name, version))
    }

    pub fn resolve_forwards(&self, id: SymbolId) -> SymbolId {
        with_db!(self, db => db.resolve_forwards(id))
    }

    pub fn add_warning(&mut self, name: &'data [u8], object: ObjectId, shndx: u16) {
        with_db!(self, db => db.add_warning(name, object, shndx))
    }

    pub fn issue_warning(&self, id: SymbolId, location: &str) {
        with_db!(self, db => db.issue_warning(id, location))
    }

    pub fn saw_undefined_count(&self) -> usize {
        with_db!(self, db => db.saw_undefined_count())
    }

    pub fn output_count(&self) -> usize {
        with_db!(self, db => db.output_count())
    }

    pub fn anchors_mut(&mut self) -> &mut OutputAnchors {
        with_db!(self, db => db.anchors_mut())
    }

    pub fn finalize(&mut self, offset: u64, pool: &mut OutputStringPool<'data>) -> Result<u64> {
        with_db!(self, db => db.finalize(offset, pool))
    }

    pub fn write_globals(&self, pool: &OutputStringPool<'data>, out: &mut OutputFile) -> Result {
        with_db!(self, db => db.write_globals(pool, out))
    }
}

/// The pre-read symbol data of one relocatable object.
pub struct RelocatableInput<'data> {
    pub object: &'data dyn InputObject<'data>,
    pub symbols: &'data [u8],
    pub count: usize,
    pub strtab: &'data [u8],
}

/// The pre-read symbol data of one dynamic object.
pub struct DynamicInput<'data> {
    pub object: &'data dyn InputObject<'data>,
    pub symbols: &'data [u8],
    pub count: usize,
    pub strtab: &'data [u8],
    pub versym: Option<&'data [u8]>,
    pub version_map: Vec<Option<&'data [u8]>>,
}

pub enum InputSymbols<'data> {
    Relocatable(RelocatableInput<'data>),
    Dynamic(DynamicInput<'data>),
}

/// Ingests a batch of pre-read inputs. Workers run in parallel; each call
/// into the symbol table is serialized by the lock. Per-object errors are
/// collected, sorted and reported together rather than racing for which one
/// surfaces.
///
/// Returns, per input, the symbol-index-to-record array for relocatable
/// objects (empty for dynamic objects).
#[tracing::instrument(skip_all, name = "Load input symbols")]
pub fn load_input_symbols<'data>(
    table: &Mutex<SymbolTable<'data>>,
    inputs: &[InputSymbols<'data>],
) -> Result<Vec<Vec<Option<SymbolId>>>> {
    let error_queue = SegQueue::new();

    let pointers: Vec<Vec<Option<SymbolId>>> = inputs
        .par_iter()
        .map(|input| match load_one(table, input) {
            Ok(pointers) => pointers,
            Err(error) => {
                error_queue.push(error);
                Vec::new()
            }
        })
        .collect();

    let mut errors: Vec<Error> = error_queue.into_iter().collect();
    errors.sort_by_key(|error| error.to_string());

    if !errors.is_empty() {
        let details = errors
            .iter()
            .map(|error| error.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        bail!("symbol ingestion failed:\n{details}");
    }

    Ok(pointers)
}

fn load_one<'data>(
    table: &Mutex<SymbolTable<'data>>,
    input: &InputSymbols<'data>,
) -> Result<Vec<Option<SymbolId>>> {
    match input {
        InputSymbols::Relocatable(input) => {
            let mut pointers = vec![None; input.count];
            let mut table = table.lock().expect("symbol table lock poisoned");
            let object = table.add_object(input.object)?;
            table.add_from_relocatable_object(
                object,
                input.symbols,
                input.count,
                input.strtab,
                &mut pointers,
            )?;
            Ok(pointers)
        }
        InputSymbols::Dynamic(input) => {
            let mut table = table.lock().expect("symbol table lock poisoned");
            let object = table.add_object(input.object)?;
            table.add_from_dynamic_object(
                object,
                input.symbols,
                input.count,
                input.strtab,
                input.versym,
                &input.version_map,
            )?;
            Ok(Vec::new())
        }
    }
}
