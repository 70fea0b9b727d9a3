//! Flattened foreign-key relation index.

use super::ForeignKey;
use std::collections::{BTreeMap, BTreeSet};

type Targets = BTreeMap<String, BTreeMap<String, String>>;

/// `table → column → foreign table → foreign column → constraint`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationIndex {
    edges: BTreeMap<String, BTreeMap<String, Targets>>,
}

impl RelationIndex {
    pub fn build<'a>(keys: impl IntoIterator<Item = &'a ForeignKey>) -> Self {
        let mut edges: BTreeMap<String, BTreeMap<String, Targets>> = BTreeMap::new();
        for fk in keys {
            for (column, foreign_column) in fk.columns.iter().zip(&fk.foreign_columns) {
                edges
                    .entry(fk.table.clone())
                    .or_default()
                    .entry(column.clone())
                    .or_default()
                    .entry(fk.foreign_table.clone())
                    .or_default()
                    .insert(foreign_column.clone(), fk.name.clone());
            }
        }
        Self { edges }
    }

    /// Outgoing edges of `table.column`.
    pub fn targets(&self, table: &str, column: &str) -> Option<&Targets> {
        self.edges.get(table)?.get(column)
    }

    /// Column pairs `(from_col, to_col)` linking `from` to `to` through a chain
    /// of foreign keys (`from.a → mid.b → to.c` yields `(a, c)`).
    ///
    /// A start column is kept only when all of its paths end on the same
    /// column of `to`. Cycles are cut per path.
    pub fn indirect_columns(&self, from: &str, to: &str) -> Vec<(String, String)> {
        let Some(columns) = self.edges.get(from) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for column in columns.keys() {
            let mut terminals = BTreeSet::new();
            let mut path = vec![(from.to_string(), column.clone())];
            self.walk(from, column, to, &mut path, &mut terminals);
            if terminals.len() == 1 {
                if let Some(terminal) = terminals.pop_first() {
                    out.push((column.clone(), terminal));
                }
            }
        }
        out
    }

    fn walk(
        &self,
        table: &str,
        column: &str,
        to: &str,
        path: &mut Vec<(String, String)>,
        terminals: &mut BTreeSet<String>,
    ) {
        let Some(targets) = self.targets(table, column) else {
            return;
        };
        for (ftable, fcolumns) in targets {
            for fcolumn in fcolumns.keys() {
                if ftable == to {
                    terminals.insert(fcolumn.clone());
                    continue;
                }
                let step = (ftable.clone(), fcolumn.clone());
                if path.contains(&step) {
                    continue;
                }
                path.push(step);
                self.walk(ftable, fcolumn, to, path, terminals);
                path.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(name: &str, table: &str, column: &str, ftable: &str, fcolumn: &str) -> ForeignKey {
        ForeignKey::new(name, table, [column], ftable, [fcolumn])
    }

    #[test]
    fn indirect_path_through_intermediate_table() {
        let keys = [
            fk("fk_b_a", "t_b", "a_id", "t_a", "id"),
            fk("fk_c_b", "t_c", "b_id", "t_b", "a_id"),
        ];
        let index = RelationIndex::build(&keys);
        assert_eq!(
            index.indirect_columns("t_c", "t_a"),
            vec![("b_id".to_string(), "id".to_string())]
        );
        assert!(index.indirect_columns("t_a", "t_c").is_empty());
    }

    #[test]
    fn diverging_paths_are_dropped() {
        let keys = [
            fk("fk1", "t_x", "m_id", "t_m", "id"),
            fk("fk2", "t_m", "id", "t_y", "id"),
            fk("fk3", "t_m", "id", "t_y", "code"),
        ];
        let index = RelationIndex::build(&keys);
        assert!(index.indirect_columns("t_x", "t_y").is_empty());
    }

    #[test]
    fn cycles_terminate() {
        let keys = [
            fk("fk1", "t_p", "q_id", "t_q", "p_id"),
            fk("fk2", "t_q", "p_id", "t_p", "q_id"),
        ];
        let index = RelationIndex::build(&keys);
        assert!(index.indirect_columns("t_p", "t_r").is_empty());
        let targets = index.targets("t_p", "q_id").unwrap();
        assert_eq!(targets["t_q"]["p_id"], "fk1");
    }
}
