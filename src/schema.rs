use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::SetupConfig;
use crate::db::Connector;
use crate::sql;

/// Recreates the LOAD_TEST_* tables and sequences and seeds them.
pub fn setup_test_data(connector: &dyn Connector, setup: &SetupConfig) -> Result<()> {
    info!("setting_up_test_data");

    let mut session = connector.connect().context("connecting for schema setup")?;

    // Nothing to drop on a fresh schema
    if let Err(e) = session.execute(sql::DROP_TABLES, &[]) {
        debug!(error = %e, "drop_tables_skipped");
    }
    if let Err(e) = session.execute(sql::DROP_SEQUENCES, &[]) {
        debug!(error = %e, "drop_sequences_skipped");
    }

    info!(
        tables = ?[sql::ORDERS_TABLE, sql::LOCK_TARGET_TABLE],
        "creating_tables"
    );
    for ddl in [
        sql::CREATE_ORDERS,
        sql::CREATE_LOCK_TARGET,
        sql::CREATE_ORDER_SEQ,
        sql::CREATE_LOCK_SEQ,
    ] {
        session
            .execute(ddl, &[])
            .with_context(|| format!("running {ddl}"))?;
    }

    info!(
        orders = setup.seed_orders,
        lock_targets = setup.seed_lock_targets,
        "seeding_test_data"
    );
    session
        .execute(&sql::seed_orders(setup.seed_orders), &[])
        .context("seeding orders")?;
    session
        .execute(&sql::seed_lock_targets(setup.seed_lock_targets), &[])
        .context("seeding lock targets")?;
    session.commit()?;

    info!("test_data_ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeConnector;

    #[test]
    fn recreates_and_seeds_in_order() {
        let fake = FakeConnector::new();
        setup_test_data(&fake, &SetupConfig::default()).unwrap();

        let log = fake.log();
        assert_eq!(log.len(), 9);
        assert!(log[0].contains("DROP TABLE"));
        assert!(log[1].contains("DROP SEQUENCE"));
        assert!(log[2].contains("CREATE TABLE LOAD_TEST_ORDERS"));
        assert!(log[3].contains("CREATE TABLE LOAD_TEST_LOCK_TARGET"));
        assert!(log[4].contains("CREATE SEQUENCE load_test_order_seq"));
        assert!(log[5].contains("CREATE SEQUENCE load_test_lock_seq"));
        assert!(log[6].contains("LEVEL <= 50000"));
        assert!(log[7].contains("LEVEL <= 100"));
        assert_eq!(log[8], "COMMIT");
    }

    #[test]
    fn drop_failures_are_ignored() {
        let fake = FakeConnector::new();
        fake.fail_statements_containing("EXECUTE IMMEDIATE", "ORA-00942: table or view does not exist");

        setup_test_data(&fake, &SetupConfig::default()).unwrap();
        assert_eq!(fake.log().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn create_failure_aborts_setup() {
        let fake = FakeConnector::new();
        fake.fail_statements_containing("CREATE TABLE LOAD_TEST_ORDERS", "ORA-01031: insufficient privileges");

        let err = setup_test_data(&fake, &SetupConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("ORA-01031"));
        assert!(!fake.log().iter().any(|l| l == "COMMIT"));
    }

    #[test]
    fn seed_sizes_follow_config() {
        let fake = FakeConnector::new();
        let setup = SetupConfig {
            enabled: true,
            seed_orders: 1_000,
            seed_lock_targets: 20,
        };
        setup_test_data(&fake, &setup).unwrap();

        let log = fake.log();
        assert!(log[6].contains("LEVEL <= 1000"));
        assert!(log[7].contains("LEVEL <= 20"));
    }

    #[test]
    fn connect_failure_is_reported() {
        let fake = FakeConnector::new();
        fake.fail_next_connects(1);

        assert!(setup_test_data(&fake, &SetupConfig::default()).is_err());
    }
}
