//! Warning symbols. A `.gnu.warning.SYM` section associates warning text with
//! a symbol name; the association is recorded during ingestion, the text is
//! captured once finalization knows where every symbol landed, and relocation
//! processing triggers the actual diagnostics.

use crate::input_data::ObjectId;
use foldhash::HashMap;

#[derive(Debug, Clone, Copy)]
pub(crate) struct WarningEntry<'data> {
    pub(crate) object: ObjectId,
    pub(crate) shndx: u16,

    /// Frozen by the end of finalization so that concurrent relocation
    /// processing can read it without locking.
    pub(crate) text: Option<&'data [u8]>,
}

#[derive(Default)]
pub(crate) struct Warnings<'data> {
    /// Keyed by canonical (interned) name bytes.
    pub(crate) table: HashMap<&'data [u8], WarningEntry<'data>>,
}

impl<'data> Warnings<'data> {
    pub(crate) fn add(&mut self, name: &'data [u8], object: ObjectId, shndx: u16) {
        self.table.insert(
            name,
            WarningEntry {
                object,
                shndx,
                text: None,
            },
        );
    }

    pub(crate) fn text_for(&self, name: &[u8]) -> Option<&'data [u8]> {
        self.table.get(name).and_then(|entry| entry.text)
    }
}

/// Warning sections often carry a trailing NUL; don't let it into the
/// diagnostic.
pub(crate) fn display_text(text: &[u8]) -> std::borrow::Cow<'_, str> {
    let end = text.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_nuls_are_trimmed_for_display() {
        assert_eq!(display_text(b"do not use gets\0"), "do not use gets");
        assert_eq!(display_text(b"plain"), "plain");
        assert_eq!(display_text(b"\0\0"), "");
    }

    #[test]
    fn later_association_for_a_name_wins() {
        let mut warnings = Warnings::default();
        warnings.add(b"gets", ObjectId::from_const(0), 3);
        warnings.add(b"gets", ObjectId::from_const(1), 4);
        let entry = warnings.table[&b"gets"[..]];
        assert_eq!(entry.object, ObjectId::from_const(1));
        assert!(entry.text.is_none());
    }
}
