use bc_primitives::Address;
use bc_store::Condition;

use crate::error::ChainError;
use crate::ledger::Ledger;
use crate::system_tables as sys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnsEntry {
    pub name: String,
    pub version: String,
    pub address: Address,
    pub abi: String,
}

impl Ledger {
    /// Registers one `(name, version)` pair. Distinct versions of the same
    /// name are distinct rows; re-registering the same `(name, version)`
    /// adds another row rather than overwriting, matching the rest of the
    /// table family's append-only shape.
    pub fn cns_insert(
        &self,
        name: &str,
        version: &str,
        address: Address,
        abi: &str,
    ) -> Result<i64, ChainError> {
        let table = self.factory().open_table(sys::CNS)?;
        let mut entry = table.new_entry();
        entry.set("version", version);
        entry.set("address", address.to_string());
        entry.set("abi", abi);
        Ok(table.insert(name, entry, None)?)
    }

    pub fn cns_select_by_name(&self, name: &str) -> Result<Vec<CnsEntry>, ChainError> {
        let table = self.factory().open_table(sys::CNS)?;
        let rows = table.select(name, &Condition::new());
        let mut out = Vec::with_capacity(rows.len());
        for entry in rows {
            out.push(self.cns_entry_from_row(name, &entry)?);
        }
        Ok(out)
    }

    /// Returns the first row (in storage scan order) whose version matches,
    /// not the only such row — the original's scan breaks on first match
    /// even when later rows would also match, and that behavior is kept
    /// rather than changed to "most recent wins".
    pub fn cns_select_by_name_and_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<CnsEntry>, ChainError> {
        let table = self.factory().open_table(sys::CNS)?;
        let condition = Condition::new().eq("version", version);
        let rows = table.select(name, &condition);
        match rows.first() {
            Some(entry) => Ok(Some(self.cns_entry_from_row(name, entry)?)),
            None => Ok(None),
        }
    }

    fn cns_entry_from_row(
        &self,
        name: &str,
        entry: &bc_store::Entry,
    ) -> Result<CnsEntry, ChainError> {
        let version = entry.get("version").unwrap_or_default().to_string();
        let abi = entry.get("abi").unwrap_or_default().to_string();
        let address_raw = entry.get("address").unwrap_or_default();
        let address: Address = address_raw.parse().map_err(|_| ChainError::CorruptSystemTable {
            table: sys::CNS,
            key: name.to_string(),
            value: address_raw.to_string(),
        })?;
        Ok(CnsEntry { name: name.to_string(), version, address, abi })
    }
}
