use std::sync::Arc;

use perfh_core::{OperationFactory, OperationSettings};

use crate::{Error, Result};

/// Builds a configured factory from free-form settings.
pub type FactoryFn = fn(&OperationSettings) -> Result<Arc<dyn OperationFactory>>;

const REGISTRY: &[(&str, FactoryFn)] = &[
    ("noop", crate::noop::factory),
    ("sleep", crate::sleep::factory),
    ("tcp-requestor", crate::tcp::factory),
];

const ALIASES: &[(&str, &str)] = &[("tcp", "tcp-requestor"), ("requestor", "tcp-requestor")];

/// Every built-in operation, keyed by name.
pub fn registry() -> &'static [(&'static str, FactoryFn)] {
    REGISTRY
}

pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Looks `name` up (case-insensitive, aliases allowed) and builds its factory.
pub fn create_factory(name: &str, settings: &OperationSettings) -> Result<Arc<dyn OperationFactory>> {
    let wanted = name.trim().to_ascii_lowercase();
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == wanted)
        .map_or(wanted.as_str(), |(_, target)| *target);

    let Some((_, build)) = REGISTRY.iter().find(|(n, _)| *n == canonical) else {
        return Err(Error::UnknownOperation {
            name: name.to_string(),
            available: names().collect::<Vec<_>>().join(", "),
        });
    };
    build(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_known_operations() {
        for name in ["noop", "SLEEP", "sleep"] {
            assert!(
                create_factory(name, &OperationSettings::new()).is_ok(),
                "{name} should build"
            );
        }
    }

    #[test]
    fn resolves_aliases() {
        let settings = OperationSettings::new().with("port", "9");
        assert!(create_factory("tcp", &settings).is_ok());
    }

    #[test]
    fn unknown_names_list_the_alternatives() {
        let err = match create_factory("carrier-pigeon", &OperationSettings::new()) {
            Ok(_) => panic!("unknown operation accepted"),
            Err(err) => err,
        };
        assert_eq!(
            err.to_string(),
            "unknown operation `carrier-pigeon` (available: noop, sleep, tcp-requestor)"
        );
    }

    #[test]
    fn names_are_sorted_and_unique() {
        let names: Vec<_> = names().collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
    }
}
