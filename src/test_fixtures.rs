//! Shared fixtures for the in-module tests: a scriptable input object, a
//! scriptable target, and builders for raw symbol-table and string-table
//! bytes.

use crate::elf::ElfClass;
use crate::error::Result;
use crate::input_data::InputObject;
use crate::input_data::Target;
use crate::input_data::TargetSymbol;
use crate::output::OutputSectionInfo;
use anyhow::anyhow;
use object::Endianness;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(Clone)]
pub(crate) struct TestTarget {
    pub(crate) word_bits: u8,
    pub(crate) big_endian: bool,
    pub(crate) reject: Vec<&'static [u8]>,
    pub(crate) special: Vec<&'static [u8]>,
}

impl Default for TestTarget {
    fn default() -> Self {
        Self {
            word_bits: 64,
            big_endian: false,
            reject: Vec::new(),
            special: Vec::new(),
        }
    }
}

impl Target for TestTarget {
    fn word_bits(&self) -> u8 {
        self.word_bits
    }

    fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    fn has_make_symbol(&self) -> bool {
        !self.reject.is_empty() || !self.special.is_empty()
    }

    fn make_symbol(&self, name: &[u8]) -> Option<TargetSymbol> {
        if self.reject.iter().any(|n| *n == name) {
            None
        } else if self.special.iter().any(|n| *n == name) {
            Some(TargetSymbol::Special)
        } else {
            Some(TargetSymbol::Plain)
        }
    }
}

pub(crate) struct TestObject<'data> {
    pub(crate) name: String,
    pub(crate) dynamic: bool,
    pub(crate) target: TestTarget,
    excluded: Vec<u16>,
    placements: HashMap<u16, Option<(OutputSectionInfo, u64)>>,
    sections: HashMap<u16, &'data [u8]>,
}

impl<'data> TestObject<'data> {
    pub(crate) fn relocatable(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            dynamic: false,
            target: TestTarget::default(),
            excluded: Vec::new(),
            placements: HashMap::new(),
            sections: HashMap::new(),
        }
    }

    pub(crate) fn dynamic(name: &str) -> Self {
        Self {
            dynamic: true,
            ..Self::relocatable(name)
        }
    }

    pub(crate) fn with_target(mut self, target: TestTarget) -> Self {
        self.target = target;
        self
    }

    pub(crate) fn exclude_section(mut self, shndx: u16) -> Self {
        self.excluded.push(shndx);
        self
    }

    /// Places input section `shndx` at `offset` within an output section at
    /// `address` with output index `out_shndx`.
    pub(crate) fn place_section(mut self, shndx: u16, address: u64, out_shndx: u16, offset: u64) -> Self {
        self.placements.insert(
            shndx,
            Some((OutputSectionInfo { address, out_shndx }, offset)),
        );
        self
    }

    pub(crate) fn discard_section(mut self, shndx: u16) -> Self {
        self.placements.insert(shndx, None);
        self
    }

    pub(crate) fn section_bytes(mut self, shndx: u16, data: &'data [u8]) -> Self {
        self.sections.insert(shndx, data);
        self
    }
}

impl<'data> InputObject<'data> for TestObject<'data> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn target(&self) -> &dyn Target {
        &self.target
    }

    fn is_section_included(&self, shndx: u16) -> bool {
        !self.excluded.contains(&shndx)
    }

    fn output_section(&self, shndx: u16) -> Option<(OutputSectionInfo, u64)> {
        self.placements.get(&shndx).copied().flatten()
    }

    fn section_contents(&self, shndx: u16) -> Result<&'data [u8]> {
        self.sections
            .get(&shndx)
            .copied()
            .ok_or_else(|| anyhow!("{}: no such section {shndx}", self.name))
    }
}

/// Builds the raw symbol-table and string-table bytes for one input object.
pub(crate) struct ObjSymbols {
    endian: Endianness,
    entries: Vec<(Vec<u8>, u8, u8, u16, u64, u64)>,
}

pub(crate) struct BuiltSymbols {
    pub(crate) symbols: Vec<u8>,
    pub(crate) strtab: Vec<u8>,
    pub(crate) count: usize,
}

impl ObjSymbols {
    pub(crate) fn new(endian: Endianness) -> Self {
        Self {
            endian,
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(
        mut self,
        name: &[u8],
        binding: u8,
        st_type: u8,
        shndx: u16,
        value: u64,
        size: u64,
    ) -> Self {
        self.entries.push((
            name.to_owned(),
            crate::elf::st_info(binding, st_type),
            0,
            shndx,
            value,
            size,
        ));
        self
    }

    pub(crate) fn add_with_other(
        mut self,
        name: &[u8],
        binding: u8,
        st_type: u8,
        st_other: u8,
        shndx: u16,
        value: u64,
        size: u64,
    ) -> Self {
        self.entries.push((
            name.to_owned(),
            crate::elf::st_info(binding, st_type),
            st_other,
            shndx,
            value,
            size,
        ));
        self
    }

    pub(crate) fn build<C: ElfClass>(&self) -> BuiltSymbols {
        let mut strtab = vec![0u8];
        let mut symbols = Vec::new();
        for (name, st_info, st_other, shndx, value, size) in &self.entries {
            let st_name = if name.is_empty() {
                0
            } else {
                let offset = strtab.len() as u32;
                strtab.extend_from_slice(name);
                strtab.push(0);
                offset
            };
            let sym = C::make_sym(self.endian, st_name, *st_info, *st_other, *shndx, *value, *size);
            symbols.extend_from_slice(object::bytes_of(&sym));
        }
        BuiltSymbols {
            symbols,
            strtab,
            count: self.entries.len(),
        }
    }
}

/// Raw `.gnu.version` bytes for a dynamic object.
pub(crate) fn versym_bytes(endian: Endianness, values: &[u16]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|value| match endian {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        })
        .collect()
}

/// A diagnostics sink whose output the test can read back.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(pub(crate) Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A quiet diagnostics handle for tests that don't inspect output.
pub(crate) fn quiet_diagnostics() -> crate::diagnostics::Diagnostics {
    crate::diagnostics::Diagnostics::with_sink("ld", false, Box::new(std::io::sink()))
}
