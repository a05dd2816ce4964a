//! Interfaces to the output side of the link. Linker-defined symbols anchor
//! to output data blobs or segments by ID; layout reports addresses for those
//! anchors once it has assigned them, and the writer serializes into an
//! `OutputFile` view.

use crate::error::Result;
use anyhow::bail;

/// The output section that ends up holding an input section, as reported by
/// `InputObject::output_section`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSectionInfo {
    /// Runtime address of the output section.
    pub address: u64,

    /// Section index in the output file's section table.
    pub out_shndx: u16,
}

/// Identifies a linker-generated blob of output data registered with the
/// symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputDataId(u32);

/// Identifies an output segment registered with the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSegmentId(u32);

#[derive(Debug, Default, Clone, Copy)]
struct OutputDataAnchor {
    address: u64,
    size: u64,
    out_shndx: u16,
    laid_out: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct OutputSegmentAnchor {
    vaddr: u64,
    memsz: u64,
    filesz: u64,
    laid_out: bool,
}

/// Registry of the output anchors that linker-defined symbols can refer to.
/// Anchors are allocated before layout; their addresses are filled in by
/// layout and must be set before finalization reads them.
#[derive(Default)]
pub struct OutputAnchors {
    data: Vec<OutputDataAnchor>,
    segments: Vec<OutputSegmentAnchor>,
}

impl OutputAnchors {
    pub fn add_data(&mut self) -> OutputDataId {
        let id = OutputDataId(u32::try_from(self.data.len()).expect("Output data anchors overflowed 32 bits"));
        self.data.push(OutputDataAnchor::default());
        id
    }

    pub fn add_segment(&mut self) -> OutputSegmentId {
        let id = OutputSegmentId(
            u32::try_from(self.segments.len()).expect("Output segment anchors overflowed 32 bits"),
        );
        self.segments.push(OutputSegmentAnchor::default());
        id
    }

    pub fn set_data_layout(&mut self, id: OutputDataId, address: u64, size: u64, out_shndx: u16) {
        let anchor = &mut self.data[id.0 as usize];
        *anchor = OutputDataAnchor {
            address,
            size,
            out_shndx,
            laid_out: true,
        };
    }

    pub fn set_segment_layout(&mut self, id: OutputSegmentId, vaddr: u64, memsz: u64, filesz: u64) {
        let anchor = &mut self.segments[id.0 as usize];
        *anchor = OutputSegmentAnchor {
            vaddr,
            memsz,
            filesz,
            laid_out: true,
        };
    }

    fn data(&self, id: OutputDataId) -> &OutputDataAnchor {
        let anchor = &self.data[id.0 as usize];
        assert!(anchor.laid_out, "output data anchor read before layout");
        anchor
    }

    fn segment(&self, id: OutputSegmentId) -> &OutputSegmentAnchor {
        let anchor = &self.segments[id.0 as usize];
        assert!(anchor.laid_out, "output segment anchor read before layout");
        anchor
    }

    pub(crate) fn data_address(&self, id: OutputDataId) -> u64 {
        self.data(id).address
    }

    pub(crate) fn data_size(&self, id: OutputDataId) -> u64 {
        self.data(id).size
    }

    pub(crate) fn data_shndx(&self, id: OutputDataId) -> u16 {
        self.data(id).out_shndx
    }

    pub(crate) fn segment_vaddr(&self, id: OutputSegmentId) -> u64 {
        self.segment(id).vaddr
    }

    pub(crate) fn segment_memsz(&self, id: OutputSegmentId) -> u64 {
        self.segment(id).memsz
    }

    pub(crate) fn segment_filesz(&self, id: OutputSegmentId) -> u64 {
        self.segment(id).filesz
    }
}

/// In-memory image of the output file being written.
pub struct OutputFile {
    data: Vec<u8>,
}

impl OutputFile {
    pub fn with_size(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    /// A writable view of `len` bytes at `offset`.
    pub fn view(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let start = usize::try_from(offset)?;
        let Some(end) = start.checked_add(len) else {
            bail!("output view overflows");
        };
        if end > self.data.len() {
            bail!(
                "output view 0x{start:x}..0x{end:x} exceeds file size 0x{:x}",
                self.data.len()
            );
        }
        Ok(&mut self.data[start..end])
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
