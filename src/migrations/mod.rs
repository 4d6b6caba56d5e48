mod m0001_initial;
mod m0002_indexes;
mod m0003_open_lead_guard;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_initial::migration());
    reg.register(m0002_indexes::migration());
    reg.register(m0003_open_lead_guard::migration());
    reg
}
