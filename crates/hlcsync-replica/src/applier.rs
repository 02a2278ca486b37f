//! Mutation Applier: folds stamped mutations into the digest and the rows.

use crate::error::StoreError;
use crate::store::RowStore;
use hlcsync_core::{DigestNode, LwwRegister, Mutation};

/// Apply `mutations` on top of `root`, returning the new digest root.
///
/// Each mutation's timestamp is inserted into the digest, the mutation is
/// logged, and its cell is overwritten only if the mutation's timestamp is
/// greater than the stored one. Every step is idempotent, so re-applying a
/// mutation changes nothing.
///
/// # Errors
///
/// Returns the first storage error; `rows` may then hold partial writes and
/// the caller must not commit.
pub fn apply_mutations<R: RowStore + ?Sized>(
    rows: &mut R,
    mut root: DigestNode,
    mutations: &[Mutation],
) -> Result<DigestNode, StoreError> {
    let mut written = 0usize;

    for mutation in mutations {
        root.insert(&mutation.timestamp);
        rows.record_mutation(mutation)?;

        let register = match rows.read_value(&mutation.key)? {
            Some(mut current) => current
                .set(mutation.value.clone(), mutation.timestamp)
                .then_some(current),
            None => Some(LwwRegister::new(mutation.value.clone(), mutation.timestamp)),
        };
        if let Some(register) = register {
            rows.write_value(&mutation.key, &register)?;
            written += 1;
        }
    }

    tracing::debug!(
        mutations = mutations.len(),
        cells_written = written,
        digest = format_args!("{:016x}", root.hash()),
        "Applied mutations"
    );

    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::Storage;
    use hlcsync_core::{CellKey, Timestamp, Value};
    use uuid::Uuid;

    fn write(millis: u64, node: u8, value: &str) -> Mutation {
        Mutation {
            timestamp: Timestamp::new(millis, 0, Uuid::from_bytes([node; 16])),
            key: CellKey::new("todos", "r1", "title"),
            value: Value::from(value),
        }
    }

    #[test]
    fn greater_timestamp_wins_in_either_order() {
        let older = write(1000, 1, "old");
        let newer = write(2000, 2, "new");
        let key = older.key.clone();

        for order in [[&older, &newer], [&newer, &older]] {
            let mut store = MemoryStore::new();
            let mut tx = store.begin().unwrap();
            let mut root = DigestNode::new();
            for m in order {
                root = apply_mutations(&mut tx, root, std::slice::from_ref(m)).unwrap();
            }

            let register = tx.read_value(&key).unwrap().unwrap();
            assert_eq!(register.value, Value::from("new"));
            assert_eq!(register.timestamp, newer.timestamp);
            assert_eq!(root.len(), 2);
        }
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let batch = vec![write(1000, 1, "a"), write(1001, 1, "b")];

        let once = apply_mutations(&mut tx, DigestNode::new(), &batch).unwrap();
        let twice = apply_mutations(&mut tx, once.clone(), &batch).unwrap();

        assert_eq!(once.hash(), twice.hash());
        assert_eq!(tx.mutations_since(0).unwrap().len(), 2);
        assert_eq!(
            tx.read_value(&batch[0].key).unwrap().unwrap().value,
            Value::from("b")
        );
    }

    #[test]
    fn ties_on_millis_resolve_by_counter_then_node() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let low_node = write(1000, 1, "low");
        let high_node = write(1000, 9, "high");

        apply_mutations(&mut tx, DigestNode::new(), &[high_node.clone(), low_node]).unwrap();
        assert_eq!(
            tx.read_value(&high_node.key).unwrap().unwrap().value,
            Value::from("high")
        );
    }
}
