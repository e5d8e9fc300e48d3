use redb_bincode::{ReadableTable as _, WriteTransaction};

use super::{DbResult, KvStreamDb, tables};

impl KvStreamDb {
    /// Open every table once so later transactions never race table
    /// creation.
    pub(crate) fn init_tables_tx(tx: &WriteTransaction) -> DbResult<()> {
        tx.open_table(&tables::db_version::TABLE)?;
        tx.open_table(&tables::objects::TABLE)?;
        tx.open_table(&tables::activities::TABLE)?;
        tx.open_table(&tables::objects_by_created::TABLE)?;
        tx.open_table(&tables::objects_by_modified::TABLE)?;
        tx.open_table(&tables::activities_by_created::TABLE)?;
        tx.open_table(&tables::activities_by_modified::TABLE)?;
        tx.open_table(&tables::activities_by_verb::TABLE)?;
        tx.open_table(&tables::activities_by_actor::TABLE)?;
        tx.open_table(&tables::activities_by_object::TABLE)?;
        tx.open_table(&tables::activities_by_target::TABLE)?;
        tx.open_table(&tables::activity_parents::TABLE)?;
        Ok(())
    }

    /// Remove every entry of a table. Used by the destructive
    /// `clear_all_*` test surface.
    pub(crate) fn drain_table_tx<K, V>(table: &mut redb_bincode::Table<'_, K, V>) -> DbResult<()>
    where
        K: bincode::Decode<()> + bincode::Encode,
        V: bincode::Decode<()> + bincode::Encode,
    {
        let mut keys = vec![];
        for entry in table.range(..)? {
            let (k, _) = entry?;
            keys.push(k.value());
        }
        for key in &keys {
            table.remove(key)?;
        }
        Ok(())
    }
}
