//! Collision-free naming of characteristics

use std::collections::HashSet;
use tracing::info;

use crate::models::{CharacteristicGroup, Characteristics};

/// First of `name`, `name 1`, `name 2`, ... not present in `used`.
fn unused_name(name: &str, used: &HashSet<String>) -> String {
    if !used.contains(name) {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{name} {n}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Accumulates one characteristics group, renaming repeated names within it.
#[derive(Debug, Default)]
pub struct GroupBuilder {
    used: HashSet<String>,
    group: CharacteristicGroup,
}

impl GroupBuilder {
    pub fn insert(&mut self, name: &str, value: String) {
        let unique = unused_name(name, &self.used);
        if unique != name {
            info!(
                "Duplicate characteristic '{}' renamed to '{}' (value: {})",
                name, unique, value
            );
        }
        self.used.insert(unique.clone());
        self.group.insert(unique, value);
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    pub fn finish(self) -> CharacteristicGroup {
        self.group
    }
}

/// Renames characteristics so that every name is unique across all groups.
///
/// Groups and names are visited in order; the first occurrence of a name is
/// kept and later ones get the lowest free ` <n>` suffix.
pub fn resolve_duplicate_names(characteristics: Characteristics) -> Characteristics {
    let mut used: HashSet<String> = HashSet::new();

    characteristics
        .into_iter()
        .map(|(group_name, specs)| {
            let group: CharacteristicGroup = specs
                .into_iter()
                .map(|(name, value)| {
                    let unique = unused_name(&name, &used);
                    if unique != name {
                        info!(
                            "Characteristic '{}' in group '{}' renamed to '{}' (value: {})",
                            name, group_name, unique, value
                        );
                    }
                    used.insert(unique.clone());
                    (unique, value)
                })
                .collect();
            (group_name, group)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristics(groups: &[(&str, &[(&str, &str)])]) -> Characteristics {
        groups
            .iter()
            .map(|(group, specs)| {
                let specs: CharacteristicGroup = specs
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect();
                (group.to_string(), specs)
            })
            .collect()
    }

    fn names(resolved: &Characteristics) -> Vec<&str> {
        resolved
            .values()
            .flat_map(|group| group.keys().map(String::as_str))
            .collect()
    }

    #[test]
    fn renames_cross_group_collisions_in_order() {
        let input = characteristics(&[
            ("Общие", &[("Вес", "180 г"), ("Цвет", "черный")]),
            ("Корпус", &[("Вес", "175 г"), ("Материал", "стекло")]),
            ("Упаковка", &[("Вес", "300 г")]),
        ]);

        let resolved = resolve_duplicate_names(input);

        assert_eq!(
            names(&resolved),
            vec!["Вес", "Цвет", "Вес 1", "Материал", "Вес 2"]
        );
        assert_eq!(resolved["Общие"]["Вес"], "180 г");
        assert_eq!(resolved["Корпус"]["Вес 1"], "175 г");
        assert_eq!(resolved["Упаковка"]["Вес 2"], "300 г");
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let input = characteristics(&[
            ("A", &[("Size", "1"), ("Size 1", "2")]),
            ("B", &[("Size", "3")]),
        ]);

        let resolved = resolve_duplicate_names(input);

        assert_eq!(resolved["B"]["Size 2"], "3");
    }

    #[test]
    fn resolving_twice_changes_nothing() {
        let input = characteristics(&[
            ("A", &[("Color", "red"), ("Weight", "1 kg")]),
            ("B", &[("Color", "blue")]),
            ("C", &[("Color", "green"), ("Weight", "2 kg")]),
        ]);

        let once = resolve_duplicate_names(input);
        let twice = resolve_duplicate_names(once.clone());

        assert_eq!(once, twice);
    }

    #[test]
    fn group_builder_only_dedupes_within_group() {
        let mut first = GroupBuilder::default();
        first.insert("Цвет", "черный".to_string());
        first.insert("Цвет", "белый".to_string());
        first.insert("Цвет", "синий".to_string());
        let first = first.finish();

        let keys: Vec<&str> = first.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Цвет", "Цвет 1", "Цвет 2"]);

        let mut second = GroupBuilder::default();
        assert!(second.is_empty());
        second.insert("Цвет", "красный".to_string());
        assert_eq!(second.finish().keys().next().map(String::as_str), Some("Цвет"));
    }
}
