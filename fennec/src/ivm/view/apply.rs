use std::cmp::Ordering as CmpOrdering;

use crate::ivm::change::{Change, Node};
use crate::ivm::schema::SourceSchema;
use crate::schema::Row;

use super::{Entry, ViewFormat, ViewSlot};

/// Apply one pipeline change to a view slot.
///
/// `schema` describes the rows at this level; `format` whether the level is
/// singular, ordered, or a transparent junction hop.
pub fn apply_change(slot: &mut ViewSlot, change: Change, schema: &SourceSchema, format: &ViewFormat) {
    if format.hidden {
        apply_hidden(slot, change, schema, format);
        return;
    }

    match change {
        Change::Add { node } => add_node(slot, node, schema, format),
        Change::Remove { node } => remove_row(slot, &node.row, schema),
        Change::Child { row, child } => {
            if let Some(entry) = find_entry(slot, &row, schema) {
                let child_schema = match schema.relationship(&child.relationship_name) {
                    Some(child_schema) => child_schema,
                    None => return,
                };
                let child_format = match format.relationships.get(&child.relationship_name) {
                    Some(child_format) => child_format,
                    None => return,
                };
                let child_slot = entry
                    .relationships
                    .entry(child.relationship_name.clone())
                    .or_insert_with(|| ViewSlot::empty(child_format.singular));
                apply_change(child_slot, *child.change, child_schema, child_format);
            }
        }
        Change::Edit { node, old_node } => edit_row(slot, old_node.row, node.row, schema),
    }
}

/// Junction hop: the level's own rows are invisible; operate on the nodes
/// one relationship down. Child and edit changes drop through.
fn apply_hidden(slot: &mut ViewSlot, change: Change, schema: &SourceSchema, format: &ViewFormat) {
    let (inner_name, inner_format) = match format.inner() {
        Some(inner) => inner,
        None => return,
    };
    let inner_schema = match schema.relationship(inner_name) {
        Some(inner_schema) => inner_schema,
        None => return,
    };

    match change {
        Change::Add { node } => {
            for child in node.relationship(inner_name).unwrap_or(&[]).iter() {
                add_node(slot, child.clone(), inner_schema, inner_format);
            }
        }
        Change::Remove { node } => {
            for child in node.relationship(inner_name).unwrap_or(&[]).iter() {
                remove_row(slot, &child.row, inner_schema);
            }
        }
        Change::Child { child, .. } => {
            if child.relationship_name == *inner_name {
                apply_change(slot, *child.change, inner_schema, inner_format);
            }
        }
        Change::Edit { .. } => {
            // Junction rows carry correlation only; edits to them do not
            // change the visible children.
        }
    }
}

fn add_node(slot: &mut ViewSlot, node: Node, schema: &SourceSchema, format: &ViewFormat) {
    match slot {
        ViewSlot::Singular(current) => match current {
            Some(entry) if schema.same_row(&entry.row, &node.row) => entry.ref_count += 1,
            _ => *current = Some(Box::new(build_entry(node, schema, format))),
        },
        ViewSlot::Ordered(entries) => match locate(entries, &node.row, schema) {
            Ok(index) => entries[index].ref_count += 1,
            Err(index) => entries.insert(index, build_entry(node, schema, format)),
        },
    }
}

fn remove_row(slot: &mut ViewSlot, row: &Row, schema: &SourceSchema) {
    match slot {
        ViewSlot::Singular(current) => {
            if let Some(entry) = current {
                if schema.same_row(&entry.row, row) {
                    entry.ref_count -= 1;
                    if entry.ref_count == 0 {
                        *current = None;
                    }
                }
            }
        }
        ViewSlot::Ordered(entries) => {
            if let Ok(index) = locate(entries, row, schema) {
                entries[index].ref_count -= 1;
                if entries[index].ref_count == 0 {
                    entries.remove(index);
                }
            }
        }
    }
}

fn edit_row(slot: &mut ViewSlot, old_row: Row, new_row: Row, schema: &SourceSchema) {
    match slot {
        ViewSlot::Singular(current) => {
            if let Some(entry) = current {
                if schema.same_row(&entry.row, &old_row) {
                    entry.row = new_row;
                }
            }
        }
        ViewSlot::Ordered(entries) => {
            let index = match locate(entries, &old_row, schema) {
                Ok(index) => index,
                Err(_) => return,
            };

            if stays_in_place(entries, index, &old_row, &new_row, schema) {
                entries[index].row = new_row;
                return;
            }

            // Relocation. With other producers still referencing the origin,
            // a shallow copy stays behind until their refs drain.
            if entries[index].ref_count == 1 {
                let mut entry = entries.remove(index);
                entry.row = new_row;
                insert_or_increment(entries, entry, schema);
            } else {
                entries[index].ref_count -= 1;
                let copy = Entry {
                    row: new_row,
                    ref_count: 1,
                    relationships: entries[index].relationships.clone(),
                };
                insert_or_increment(entries, copy, schema);
            }
        }
    }
}

/// True when the edited row sorts to the very slot it already occupies.
fn stays_in_place(
    entries: &[Entry],
    index: usize,
    old_row: &Row,
    new_row: &Row,
    schema: &SourceSchema,
) -> bool {
    if !schema.same_row(old_row, new_row) {
        return false;
    }

    let fits_left = index == 0
        || schema.compare_rows(&entries[index - 1].row, new_row) == CmpOrdering::Less;
    let fits_right = index + 1 >= entries.len()
        || schema.compare_rows(new_row, &entries[index + 1].row) == CmpOrdering::Less;

    fits_left && fits_right
}

fn insert_or_increment(entries: &mut Vec<Entry>, entry: Entry, schema: &SourceSchema) {
    match locate(entries, &entry.row, schema) {
        Ok(index) => entries[index].ref_count += entry.ref_count,
        Err(index) => entries.insert(index, entry),
    }
}

fn build_entry(node: Node, schema: &SourceSchema, format: &ViewFormat) -> Entry {
    let mut entry = Entry::new(node.row);

    for (name, children) in node.relationships {
        let child_schema = match schema.relationship(&name) {
            Some(child_schema) => child_schema,
            None => continue,
        };
        let child_format = match format.relationships.get(&name) {
            Some(child_format) => child_format,
            None => continue,
        };

        if child_format.hidden {
            // Splice the junction's visible children in directly.
            let (inner_name, inner_format) = match child_format.inner() {
                Some(inner) => inner,
                None => continue,
            };
            let inner_schema = match child_schema.relationship(inner_name) {
                Some(inner_schema) => inner_schema,
                None => continue,
            };

            let slot = entry
                .relationships
                .entry(name.clone())
                .or_insert_with(|| ViewSlot::empty(inner_format.singular));
            for junction in children {
                for inner in junction.relationship(inner_name).unwrap_or(&[]).iter() {
                    add_node(slot, inner.clone(), inner_schema, inner_format);
                }
            }
        } else {
            let mut slot = ViewSlot::empty(child_format.singular);
            for child in children {
                add_node(&mut slot, child, child_schema, child_format);
            }
            entry.relationships.insert(name, slot);
        }
    }

    entry
}

/// Binary search by the schema comparator.
fn locate(entries: &[Entry], row: &Row, schema: &SourceSchema) -> Result<usize, usize> {
    entries.binary_search_by(|entry| schema.compare_rows(&entry.row, row))
}

fn find_entry<'a>(
    slot: &'a mut ViewSlot,
    row: &Row,
    schema: &SourceSchema,
) -> Option<&'a mut Entry> {
    match slot {
        ViewSlot::Singular(current) => current.as_deref_mut().filter(|e| schema.same_row(&e.row, row)),
        ViewSlot::Ordered(entries) => match locate(entries, row, schema) {
            Ok(index) => Some(&mut entries[index]),
            Err(_) => None,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ivm::change::ChildChange;
    use fennec_postgres_types::Value;

    fn row(id: &str) -> Row {
        Row::from([("id".to_string(), Value::String(id.into()))])
    }

    fn schema() -> SourceSchema {
        SourceSchema::new("issue", &["id"], vec![])
    }

    fn ids(slot: &ViewSlot) -> Vec<String> {
        slot.entries()
            .iter()
            .map(|e| match &e.row["id"] {
                Value::String(s) => s.clone(),
                other => panic!("unexpected id {:?}", other),
            })
            .collect()
    }

    fn add(slot: &mut ViewSlot, id: &str, schema: &SourceSchema) {
        apply_change(
            slot,
            Change::Add {
                node: Node::row(row(id)),
            },
            schema,
            &ViewFormat::ordered(),
        );
    }

    #[test]
    fn test_ordered_insert_sorted() {
        let schema = schema();
        let mut slot = ViewSlot::empty(false);
        for id in ["b", "a", "c"] {
            add(&mut slot, id, &schema);
        }
        assert_eq!(ids(&slot), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_add_increments_ref_count() {
        let schema = schema();
        let mut slot = ViewSlot::empty(false);
        add(&mut slot, "a", &schema);
        add(&mut slot, "a", &schema);

        assert_eq!(slot.len(), 1);
        assert_eq!(slot.entries()[0].ref_count, 2);

        // One remove keeps it; the second drops it.
        apply_change(
            &mut slot,
            Change::Remove {
                node: Node::row(row("a")),
            },
            &schema,
            &ViewFormat::ordered(),
        );
        assert_eq!(slot.len(), 1);
        apply_change(
            &mut slot,
            Change::Remove {
                node: Node::row(row("a")),
            },
            &schema,
            &ViewFormat::ordered(),
        );
        assert!(slot.is_empty());
    }

    #[test]
    fn test_singular_ref_count() {
        let schema = schema();
        let mut slot = ViewSlot::empty(true);
        let format = ViewFormat::singular();

        for _ in 0..2 {
            apply_change(
                &mut slot,
                Change::Add {
                    node: Node::row(row("a")),
                },
                &schema,
                &format,
            );
        }
        assert_eq!(slot.entries()[0].ref_count, 2);
        assert_eq!(slot.len(), 1);
    }

    fn edit(slot: &mut ViewSlot, old: &str, new: &str, schema: &SourceSchema) {
        apply_change(
            slot,
            Change::Edit {
                node: Node::row(row(new)),
                old_node: Node::row(row(old)),
            },
            schema,
            &ViewFormat::ordered(),
        );
    }

    #[test]
    fn test_edit_relocation_with_ref_counts() {
        let schema = schema();
        let mut slot = ViewSlot::empty(false);
        for id in ["a", "b", "c"] {
            add(&mut slot, id, &schema);
        }

        // Move a to the end.
        edit(&mut slot, "a", "d", &schema);
        assert_eq!(ids(&slot), vec!["b", "c", "d"]);

        // Raise d's ref count, then move it back to the front twice.
        add(&mut slot, "d", &schema);
        assert_eq!(slot.entries()[2].ref_count, 2);

        edit(&mut slot, "d", "a", &schema);
        // Shallow copy of d stays behind with the remaining ref.
        assert_eq!(ids(&slot), vec!["a", "b", "c", "d"]);
        assert_eq!(slot.entries()[0].ref_count, 1);
        assert_eq!(slot.entries()[3].ref_count, 1);

        edit(&mut slot, "d", "a", &schema);
        assert_eq!(ids(&slot), vec!["a", "b", "c"]);
        assert_eq!(slot.entries()[0].ref_count, 2);
    }

    #[test]
    fn test_edit_in_place() {
        let schema =
            SourceSchema::new("issue", &["id"], vec![crate::query::Ordering::asc("num")]);

        let numbered = |id: &str, num: i64| {
            Row::from([
                ("id".to_string(), Value::String(id.into())),
                ("num".to_string(), Value::Int(num)),
            ])
        };

        let mut slot = ViewSlot::empty(false);
        for (id, num) in [("a", 10), ("b", 20)] {
            apply_change(
                &mut slot,
                Change::Add {
                    node: Node::row(numbered(id, num)),
                },
                &schema,
                &ViewFormat::ordered(),
            );
        }

        // 10 → 15 stays between neighbours; no relocation.
        apply_change(
            &mut slot,
            Change::Edit {
                node: Node::row(numbered("a", 15)),
                old_node: Node::row(numbered("a", 10)),
            },
            &schema,
            &ViewFormat::ordered(),
        );
        assert_eq!(slot.entries()[0].row["num"], Value::Int(15));
        assert_eq!(slot.len(), 2);
    }

    #[test]
    fn test_child_change_recurses() {
        let mut schema = schema();
        schema
            .relationships
            .insert("comments".into(), SourceSchema::new("comment", &["id"], vec![]));
        let format =
            ViewFormat::ordered().with_relationship("comments", ViewFormat::ordered());

        let mut slot = ViewSlot::empty(false);
        apply_change(
            &mut slot,
            Change::Add {
                node: Node::row(row("i1")),
            },
            &schema,
            &format,
        );

        apply_change(
            &mut slot,
            Change::Child {
                row: row("i1"),
                child: ChildChange {
                    relationship_name: "comments".into(),
                    change: Box::new(Change::Add {
                        node: Node::row(row("c1")),
                    }),
                },
            },
            &schema,
            &format,
        );

        let entry = slot.entries()[0];
        assert_eq!(entry.relationships["comments"].len(), 1);
    }

    #[test]
    fn test_hidden_level_splices() {
        // issue -> issueLabel (hidden) -> label
        let mut junction_schema = SourceSchema::new("issueLabel", &["issueId", "labelId"], vec![]);
        junction_schema
            .relationships
            .insert("labels".into(), SourceSchema::new("label", &["id"], vec![]));

        let format = ViewFormat::hidden("labels", ViewFormat::ordered());

        let mut junction_node = Node::row(Row::from([
            ("issueId".to_string(), Value::String("i1".into())),
            ("labelId".to_string(), Value::String("l1".into())),
        ]));
        junction_node
            .relationships
            .push(("labels".to_string(), vec![Node::row(row("l1"))]));

        let mut slot = ViewSlot::empty(false);
        apply_change(
            &mut slot,
            Change::Add {
                node: junction_node.clone(),
            },
            &junction_schema,
            &format,
        );

        // The junction row itself never materializes; only the label does.
        assert_eq!(ids(&slot), vec!["l1"]);

        apply_change(
            &mut slot,
            Change::Remove {
                node: junction_node,
            },
            &junction_schema,
            &format,
        );
        assert!(slot.is_empty());
    }
}
