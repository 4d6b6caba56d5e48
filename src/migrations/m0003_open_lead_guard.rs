use cetane::prelude::*;

/// A tenant may hold one open (pending or rejected) proposal per lead.
const OPEN_LEAD_URL: &str = "CREATE UNIQUE INDEX idx_proposals_open_lead_url \
    ON proposals(tenant_id, dedup_url) \
    WHERE dedup_url IS NOT NULL AND status IN ('pending', 'rejected')";

const OPEN_LEAD_TITLE: &str = "CREATE UNIQUE INDEX idx_proposals_open_lead_title \
    ON proposals(tenant_id, dedup_title, dedup_company) \
    WHERE dedup_title IS NOT NULL AND dedup_company IS NOT NULL \
    AND status IN ('pending', 'rejected')";

pub fn migration() -> Migration {
    Migration::new("0003_open_lead_guard")
        .depends_on(&["0002_indexes"])
        .operation(
            RunSql::portable()
                .for_backend("sqlite", OPEN_LEAD_URL)
                .for_backend("postgres", OPEN_LEAD_URL),
        )
        .operation(
            RunSql::portable()
                .for_backend("sqlite", OPEN_LEAD_TITLE)
                .for_backend("postgres", OPEN_LEAD_TITLE),
        )
}
