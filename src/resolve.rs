//! Merge logic for a symbol that is already in the table and an incoming
//! definition or reference of the same name. Pure CPU; no suspension points,
//! no I/O.

use crate::elf::ElfClass;
use crate::input_data::ObjectId;
use crate::symbol::RawSymbol;
use crate::symbol::Symbol;
use object::elf::SHN_COMMON;
use object::elf::SHN_UNDEF;
use object::elf::STB_GLOBAL;
use object::elf::STB_WEAK;
use object::elf::STT_COMMON;

/// Two regular objects strongly define the same symbol. The caller formats
/// the report, since it knows both definition locations.
#[derive(Debug)]
pub(crate) struct DuplicateDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strength {
    StrongDef,
    WeakDef,
    Common,
    Undef,
    WeakUndef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Keep,
    Take,
    MergeCommon,
    PromoteUndefined,
}

fn strength(raw: &RawSymbol) -> Strength {
    // Anything that isn't STB_WEAK gets strong-definition precedence; that
    // includes STB_GNU_UNIQUE and other OS-range bindings.
    let weak = raw.binding == STB_WEAK;
    if raw.shndx == SHN_UNDEF {
        if weak { Strength::WeakUndef } else { Strength::Undef }
    } else if raw.shndx == SHN_COMMON || raw.st_type == STT_COMMON {
        Strength::Common
    } else if weak {
        Strength::WeakDef
    } else {
        Strength::StrongDef
    }
}

/// The ELF precedence rules: a strong definition beats a weak one, any
/// definition beats a common, a common beats an undefined reference, and
/// definitions from dynamic objects never displace definitions from
/// relocatable objects (among dynamic definitions, the first wins).
fn decide(
    existing: Strength,
    incoming: Strength,
    from_is_dynamic: bool,
    to_is_dynamic: bool,
) -> Result<Action, DuplicateDefinition> {
    use Strength::*;
    let action = match (existing, incoming) {
        (StrongDef, StrongDef) => {
            if from_is_dynamic {
                Action::Keep
            } else if to_is_dynamic {
                Action::Take
            } else {
                return Err(DuplicateDefinition);
            }
        }
        (WeakDef | Common, StrongDef) => {
            if from_is_dynamic {
                Action::Keep
            } else {
                Action::Take
            }
        }
        (StrongDef | WeakDef, WeakDef | Common | Undef | WeakUndef) => Action::Keep,
        (Common, Common) => Action::MergeCommon,
        (Common, WeakDef | Undef | WeakUndef) => Action::Keep,
        (Undef | WeakUndef, StrongDef | WeakDef | Common) => Action::Take,
        (WeakUndef, Undef) => Action::PromoteUndefined,
        (Undef, Undef | WeakUndef) | (WeakUndef, WeakUndef) => Action::Keep,
    };
    Ok(action)
}

/// Merges `from`, observed in `object`, into the stored record `to`.
///
/// Whatever the outcome, visibility narrows to the most restrictive of the
/// two sides and contact with a dynamic object is remembered via the `in_dyn`
/// flag.
pub(crate) fn resolve<'data, C: ElfClass>(
    to: &mut Symbol<'data, C>,
    from: &RawSymbol,
    object: ObjectId,
    from_is_dynamic: bool,
    to_is_dynamic: bool,
) -> Result<(), DuplicateDefinition> {
    to.merge_visibility(from.visibility);
    if from_is_dynamic {
        to.set_in_dyn();
    }

    let existing = strength(&RawSymbol::from_symbol(to));
    match decide(existing, strength(from), from_is_dynamic, to_is_dynamic)? {
        Action::Keep => {}
        Action::Take => to.adopt_definition(from, object),
        Action::MergeCommon => to.merge_common(from),
        Action::PromoteUndefined => to.set_binding(STB_GLOBAL),
    }
    Ok(())
}

/// Merges the record `from` into the record `to`. This is only used in the
/// unusual case where there are references to both an unversioned symbol and
/// a symbol with a version, and we then discover that that version is the
/// default version.
pub(crate) fn resolve_records<'data, C: ElfClass>(
    to: &mut Symbol<'data, C>,
    from: &Symbol<'data, C>,
    from_is_dynamic: bool,
    to_is_dynamic: bool,
) -> Result<(), DuplicateDefinition> {
    to.merge_visibility(from.visibility());
    if from_is_dynamic || from.in_dyn() {
        to.set_in_dyn();
    }

    let from_raw = RawSymbol::from_symbol(from);
    let existing = strength(&RawSymbol::from_symbol(to));
    match decide(existing, strength(&from_raw), from_is_dynamic, to_is_dynamic)? {
        Action::Keep => {}
        // Copy the whole source over rather than reconstructing it, so that a
        // linker-defined record merges without losing its anchor.
        Action::Take => to.adopt_record(from),
        Action::MergeCommon => to.merge_common(&from_raw),
        Action::PromoteUndefined => to.set_binding(STB_GLOBAL),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::Elf64;
    use crate::string_pool::NameKey;
    use crate::symbol::SymbolSource;
    use object::elf;

    const OBJ_A: ObjectId = ObjectId::from_const(0);
    const OBJ_B: ObjectId = ObjectId::from_const(1);

    fn raw(shndx: u16, binding: u8) -> RawSymbol {
        RawSymbol {
            st_type: elf::STT_FUNC,
            binding,
            visibility: elf::STV_DEFAULT,
            nonvis: 0,
            shndx,
            value: 0x10,
            size: 4,
        }
    }

    fn existing(raw_sym: &RawSymbol) -> Symbol<'static, Elf64> {
        Symbol::from_object(b"foo", NameKey::NONE, None, OBJ_A, false, false, raw_sym)
    }

    #[test]
    fn strong_beats_weak_regardless_of_order() {
        let strong = raw(1, elf::STB_GLOBAL);
        let weak = RawSymbol {
            size: 8,
            ..raw(2, elf::STB_WEAK)
        };

        let mut sym = existing(&strong);
        resolve(&mut sym, &weak, OBJ_B, false, false).unwrap();
        assert_eq!(sym.binding(), elf::STB_GLOBAL);
        assert_eq!(sym.symsize(), 4);
        assert_eq!(sym.source(), SymbolSource::FromObject { object: OBJ_A, shndx: 1 });

        let mut sym = existing(&weak);
        resolve(&mut sym, &strong, OBJ_B, false, false).unwrap();
        assert_eq!(sym.binding(), elf::STB_GLOBAL);
        assert_eq!(sym.symsize(), 4);
        assert_eq!(sym.source(), SymbolSource::FromObject { object: OBJ_B, shndx: 1 });
    }

    #[test]
    fn two_strong_regular_definitions_clash() {
        let strong = raw(1, elf::STB_GLOBAL);
        let mut sym = existing(&strong);
        assert!(resolve(&mut sym, &strong, OBJ_B, false, false).is_err());
    }

    #[test]
    fn first_weak_definition_wins() {
        let weak_a = raw(1, elf::STB_WEAK);
        let weak_b = raw(2, elf::STB_WEAK);
        let mut sym = existing(&weak_a);
        resolve(&mut sym, &weak_b, OBJ_B, false, false).unwrap();
        assert_eq!(sym.object(), Some(OBJ_A));
    }

    #[test]
    fn dynamic_definition_never_displaces_regular() {
        let strong = raw(1, elf::STB_GLOBAL);
        let mut sym = existing(&strong);
        resolve(&mut sym, &strong, OBJ_B, true, false).unwrap();
        assert_eq!(sym.object(), Some(OBJ_A));
        assert!(sym.in_dyn());

        // The reverse order: the regular definition takes over, but in_dyn
        // remains set.
        let mut sym =
            Symbol::<Elf64>::from_object(b"foo", NameKey::NONE, None, OBJ_A, true, false, &strong);
        resolve(&mut sym, &strong, OBJ_B, false, true).unwrap();
        assert_eq!(sym.object(), Some(OBJ_B));
        assert!(sym.in_dyn());
    }

    #[test]
    fn commons_keep_max_size_and_alignment() {
        let common_small = RawSymbol {
            value: 4,
            size: 4,
            ..raw(elf::SHN_COMMON, elf::STB_GLOBAL)
        };
        let common_big = RawSymbol {
            value: 8,
            size: 8,
            ..raw(elf::SHN_COMMON, elf::STB_GLOBAL)
        };

        let mut sym = existing(&common_small);
        resolve(&mut sym, &common_big, OBJ_B, false, false).unwrap();
        assert!(sym.is_common());
        assert_eq!(sym.symsize(), 8);
        assert_eq!(sym.value(), 8);

        // The larger side already present: nothing shrinks.
        let mut sym = existing(&common_big);
        resolve(&mut sym, &common_small, OBJ_B, false, false).unwrap();
        assert_eq!(sym.symsize(), 8);
        assert_eq!(sym.value(), 8);
    }

    #[test]
    fn strong_definition_replaces_common_but_weak_does_not() {
        let common = raw(elf::SHN_COMMON, elf::STB_GLOBAL);
        let strong = raw(1, elf::STB_GLOBAL);
        let weak = raw(1, elf::STB_WEAK);

        let mut sym = existing(&common);
        resolve(&mut sym, &strong, OBJ_B, false, false).unwrap();
        assert!(!sym.is_common());
        assert_eq!(sym.object(), Some(OBJ_B));

        let mut sym = existing(&common);
        resolve(&mut sym, &weak, OBJ_B, false, false).unwrap();
        assert!(sym.is_common());
        assert_eq!(sym.object(), Some(OBJ_A));
    }

    #[test]
    fn undefined_takes_any_definition() {
        let undef = raw(elf::SHN_UNDEF, elf::STB_GLOBAL);
        for incoming in [
            raw(1, elf::STB_GLOBAL),
            raw(1, elf::STB_WEAK),
            raw(elf::SHN_COMMON, elf::STB_GLOBAL),
        ] {
            let mut sym = existing(&undef);
            assert!(sym.is_undefined());
            resolve(&mut sym, &incoming, OBJ_B, false, false).unwrap();
            assert!(!sym.is_undefined());
            assert_eq!(sym.object(), Some(OBJ_B));
        }
    }

    #[test]
    fn strong_undef_promotes_weak_undef() {
        let weak_undef = raw(elf::SHN_UNDEF, elf::STB_WEAK);
        let undef = raw(elf::SHN_UNDEF, elf::STB_GLOBAL);

        let mut sym = existing(&weak_undef);
        resolve(&mut sym, &undef, OBJ_B, false, false).unwrap();
        assert!(sym.is_undefined());
        assert_eq!(sym.binding(), elf::STB_GLOBAL);

        // Weak references never downgrade a strong one.
        let mut sym = existing(&undef);
        resolve(&mut sym, &weak_undef, OBJ_B, false, false).unwrap();
        assert_eq!(sym.binding(), elf::STB_GLOBAL);
    }

    #[test]
    fn visibility_narrows_on_every_merge() {
        let strong = raw(1, elf::STB_GLOBAL);
        let hidden_undef = RawSymbol {
            visibility: elf::STV_HIDDEN,
            ..raw(elf::SHN_UNDEF, elf::STB_GLOBAL)
        };
        let mut sym = existing(&strong);
        resolve(&mut sym, &hidden_undef, OBJ_B, false, false).unwrap();
        // The reference lost, but its visibility still narrows the record.
        assert_eq!(sym.visibility(), elf::STV_HIDDEN);
        assert_eq!(sym.object(), Some(OBJ_A));

        let protected_undef = RawSymbol {
            visibility: elf::STV_PROTECTED,
            ..hidden_undef
        };
        resolve(&mut sym, &protected_undef, OBJ_B, false, false).unwrap();
        assert_eq!(sym.visibility(), elf::STV_HIDDEN);
    }

    #[test]
    fn gnu_unique_has_strong_precedence() {
        let unique = raw(1, elf::STB_GNU_UNIQUE);
        let weak = raw(2, elf::STB_WEAK);
        let mut sym = existing(&weak);
        resolve(&mut sym, &unique, OBJ_B, false, false).unwrap();
        assert_eq!(sym.binding(), elf::STB_GNU_UNIQUE);
        assert_eq!(sym.object(), Some(OBJ_B));
    }

    #[test]
    fn record_merge_adopts_the_stronger_record() {
        let undef = raw(elf::SHN_UNDEF, elf::STB_GLOBAL);
        let strong = raw(1, elf::STB_GLOBAL);

        // `to` is a reference, `from` carries the definition: the definition
        // moves across, source included.
        let mut to = existing(&undef);
        let from = Symbol::<Elf64>::from_object(b"foo", NameKey::NONE, None, OBJ_B, false, false, &strong);
        resolve_records(&mut to, &from, false, false).unwrap();
        assert_eq!(to.source(), SymbolSource::FromObject { object: OBJ_B, shndx: 1 });

        // The other way around, the definition stays put.
        let mut to = existing(&strong);
        let from = Symbol::<Elf64>::from_object(b"foo", NameKey::NONE, None, OBJ_B, false, false, &undef);
        resolve_records(&mut to, &from, false, false).unwrap();
        assert_eq!(to.source(), SymbolSource::FromObject { object: OBJ_A, shndx: 1 });
    }
}
