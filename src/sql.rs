//! Canned statements. Each one targets a particular wait event or
//! instance statistic; the generator that issues it is named after it.

pub const ORDERS_TABLE: &str = "LOAD_TEST_ORDERS";
pub const LOCK_TARGET_TABLE: &str = "LOAD_TEST_LOCK_TARGET";

// Schema

pub const DROP_TABLES: &str = "BEGIN \
    FOR t IN (SELECT table_name FROM user_tables WHERE table_name LIKE 'LOAD_TEST_%') LOOP \
    EXECUTE IMMEDIATE 'DROP TABLE ' || t.table_name || ' PURGE'; \
    END LOOP; \
    END;";

pub const DROP_SEQUENCES: &str = "BEGIN \
    FOR s IN (SELECT sequence_name FROM user_sequences \
    WHERE sequence_name IN ('LOAD_TEST_ORDER_SEQ', 'LOAD_TEST_LOCK_SEQ')) LOOP \
    EXECUTE IMMEDIATE 'DROP SEQUENCE ' || s.sequence_name; \
    END LOOP; \
    END;";

pub const CREATE_ORDERS: &str = "CREATE TABLE LOAD_TEST_ORDERS (\
    order_id NUMBER PRIMARY KEY, \
    customer_id NUMBER, \
    product_id NUMBER, \
    order_date DATE, \
    order_amount NUMBER(10,2), \
    status VARCHAR2(20), \
    region VARCHAR2(50), \
    sales_rep VARCHAR2(100), \
    comments VARCHAR2(4000), \
    lock_flag NUMBER DEFAULT 0, \
    created_date TIMESTAMP DEFAULT SYSTIMESTAMP)";

pub const CREATE_LOCK_TARGET: &str = "CREATE TABLE LOAD_TEST_LOCK_TARGET (\
    id NUMBER PRIMARY KEY, \
    data VARCHAR2(500), \
    counter NUMBER DEFAULT 0, \
    last_update TIMESTAMP DEFAULT SYSTIMESTAMP)";

pub const CREATE_ORDER_SEQ: &str = "CREATE SEQUENCE load_test_order_seq START WITH 1 INCREMENT BY 1";
pub const CREATE_LOCK_SEQ: &str = "CREATE SEQUENCE load_test_lock_seq START WITH 1 INCREMENT BY 1";

pub fn seed_orders(count: u32) -> String {
    format!(
        "INSERT INTO LOAD_TEST_ORDERS \
         (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
         SELECT load_test_order_seq.NEXTVAL, MOD(LEVEL, 1000) + 1, MOD(LEVEL, 500) + 1, \
         SYSDATE - DBMS_RANDOM.VALUE(1, 365), ROUND(DBMS_RANDOM.VALUE(10, 10000), 2), \
         CASE MOD(LEVEL, 4) WHEN 0 THEN 'PENDING' WHEN 1 THEN 'PROCESSING' \
         WHEN 2 THEN 'COMPLETED' ELSE 'CANCELLED' END, \
         'Region' || MOD(LEVEL, 10), 'Rep' || MOD(LEVEL, 50), \
         RPAD('Order data ' || LEVEL, 1000, ' padding') \
         FROM dual CONNECT BY LEVEL <= {count}"
    )
}

pub fn seed_lock_targets(count: u32) -> String {
    format!(
        "INSERT INTO LOAD_TEST_LOCK_TARGET (id, data, counter) \
         SELECT load_test_lock_seq.NEXTVAL, 'Lock target ' || LEVEL, 0 \
         FROM dual CONNECT BY LEVEL <= {count}"
    )
}

// Continuous generators

pub const CPU_INTENSIVE: [&str; 3] = [
    "SELECT /*+ FULL(o) */ order_id, customer_id, \
     POWER(order_amount, 2) AS amount_squared, SQRT(order_amount) AS amount_sqrt, \
     LN(order_amount + 1) AS amount_log, DBMS_RANDOM.VALUE(1, 1000000) AS random_calc \
     FROM LOAD_TEST_ORDERS o \
     WHERE order_amount > (SELECT AVG(order_amount) * 0.8 FROM LOAD_TEST_ORDERS) \
     ORDER BY order_amount DESC",
    "SELECT /*+ USE_HASH(o1 o2) */ COUNT(*) \
     FROM LOAD_TEST_ORDERS o1, LOAD_TEST_ORDERS o2 \
     WHERE o1.region = o2.region AND o1.status = o2.status AND ROWNUM <= 10000",
    "SELECT o.order_id, o.customer_id, o.order_amount, \
     (SELECT COUNT(*) FROM LOAD_TEST_ORDERS o2 WHERE o2.customer_id = o.customer_id) AS cust_order_count \
     FROM LOAD_TEST_ORDERS o \
     WHERE o.status = 'PENDING' \
     AND NOT EXISTS (SELECT 1 FROM LOAD_TEST_ORDERS o3 \
     WHERE o3.customer_id = o.customer_id AND o3.status = 'COMPLETED' \
     AND o3.order_date > o.order_date)",
];

pub const IO_AGGREGATES: [&str; 2] = [
    "SELECT customer_id, COUNT(*) AS order_count, SUM(order_amount) AS total_amount, \
     AVG(order_amount) AS avg_amount, \
     RANK() OVER (ORDER BY SUM(order_amount) DESC) AS customer_rank \
     FROM LOAD_TEST_ORDERS GROUP BY customer_id ORDER BY total_amount DESC",
    "SELECT region, status, COUNT(*) cnt, SUM(order_amount) total, \
     ROW_NUMBER() OVER (PARTITION BY region ORDER BY COUNT(*) DESC) AS rn \
     FROM LOAD_TEST_ORDERS GROUP BY region, status ORDER BY region, cnt DESC",
];

pub const IO_BULK_INSERT: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    SELECT load_test_order_seq.NEXTVAL, MOD(ROWNUM, 1000) + 1, MOD(ROWNUM, 500) + 1, \
    SYSDATE, ROUND(DBMS_RANDOM.VALUE(10, 1000), 2), 'PENDING', \
    'Region' || MOD(ROWNUM, 10), 'Rep' || MOD(ROWNUM, 50), RPAD('Bulk insert', 500, ' data') \
    FROM dual CONNECT BY LEVEL <= 1000";

pub const ENQUEUE_UPDATE: &str = "UPDATE LOAD_TEST_LOCK_TARGET \
    SET counter = counter + 1, last_update = SYSTIMESTAMP WHERE id = :1";

pub const LATCH_INSERT: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    VALUES (load_test_order_seq.NEXTVAL, :1, :2, SYSDATE, :3, 'PENDING', 'Region0', 'Rep1', 'Latch contention test')";

pub const REDO_INSERT: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    SELECT load_test_order_seq.NEXTVAL, MOD(LEVEL, 1000) + 1, MOD(LEVEL, 500) + 1, \
    SYSDATE, ROUND(DBMS_RANDOM.VALUE(10, 1000), 2), 'PENDING', \
    'Region' || MOD(LEVEL, 10), 'Rep1', RPAD('Redo generation', 2000, ' heavy write load') \
    FROM dual CONNECT BY LEVEL <= 500";

pub const PARALLEL_FULL_SCAN: &str = "SELECT /*+ FULL(o) PARALLEL(o, 4) */ \
    order_id, customer_id, product_id, order_amount, comments \
    FROM LOAD_TEST_ORDERS o WHERE order_amount > 100 ORDER BY order_amount DESC";

pub const POINT_LOOKUP: &str = "SELECT order_amount FROM LOAD_TEST_ORDERS WHERE order_id = :1";

pub const HOT_ROW_UPDATE: &str = "UPDATE LOAD_TEST_LOCK_TARGET \
    SET counter = counter + 1, data = SUBSTR('Worker' || :1 || ' updated', 1, 100) \
    WHERE id = :2";

// Lock contention

pub const BLOCKER_UPDATE: &str = "UPDATE LOAD_TEST_LOCK_TARGET \
    SET counter = counter + 1, last_update = SYSTIMESTAMP, data = data || ' LOCKED' \
    WHERE id BETWEEN 1 AND 50";

pub const BLOCKED_UPDATE: &str = "UPDATE LOAD_TEST_LOCK_TARGET \
    SET counter = counter + 100, data = data || ' BLOCKED_SESSION' \
    WHERE id BETWEEN 25 AND 75";

// Bursts

pub const TABLESPACE_FILL: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    SELECT load_test_order_seq.NEXTVAL, MOD(LEVEL, 1000), MOD(LEVEL, 500), \
    SYSDATE, 999.99, 'PENDING', 'Region0', 'Rep1', RPAD('Tablespace pressure test', 3500, 'X') \
    FROM dual CONNECT BY LEVEL <= 2000";

pub const TEMP_SPACE_JOIN: &str = "SELECT /*+ USE_HASH(o1 o2) */ o1.order_id, o2.order_id, \
    RANK() OVER (ORDER BY o1.order_amount + o2.order_amount DESC) \
    FROM LOAD_TEST_ORDERS o1, LOAD_TEST_ORDERS o2 \
    WHERE o1.region = o2.region \
    ORDER BY o1.order_amount + o2.order_amount DESC";

pub fn undo_update(bucket: u32) -> String {
    format!(
        "UPDATE LOAD_TEST_ORDERS \
         SET order_amount = order_amount * 1.01, \
         comments = SUBSTR(comments, 1, 3000) || ' UNDO_TEST' \
         WHERE MOD(order_id, 100) = {bucket}"
    )
}

/// Literal values on purpose: every distinct text is a new cursor.
pub fn literal_count(customer_id: u32, region: u32) -> String {
    format!(
        "SELECT COUNT(*) FROM LOAD_TEST_ORDERS WHERE customer_id = {customer_id} \
         AND region = 'Region{region}'"
    )
}

pub const DICTIONARY_LOOKUP: &str =
    "SELECT table_name FROM user_tables WHERE table_name LIKE 'LOAD_TEST%'";

pub const CHECKPOINT_INSERT: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    SELECT load_test_order_seq.NEXTVAL, LEVEL, LEVEL, SYSDATE, \
    DBMS_RANDOM.VALUE(1, 1000), 'PENDING', 'Region0', 'Rep1', RPAD('Checkpoint test', 2000, 'Y') \
    FROM dual CONNECT BY LEVEL <= 5000";

pub const CHECKPOINT_UPDATE: &str = "UPDATE LOAD_TEST_ORDERS SET status = 'PROCESSING' \
    WHERE status = 'PENDING' AND ROWNUM <= 3000";

pub const ARCHIVE_LOG_INSERT: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    SELECT load_test_order_seq.NEXTVAL, MOD(LEVEL, 500), MOD(LEVEL, 250), \
    SYSDATE, 100, 'PENDING', 'Region0', 'Rep1', RPAD('Archive log generation', 1500, 'Z') \
    FROM dual CONNECT BY LEVEL <= 1000";

/// The comment makes each text unique, forcing a hard parse.
pub fn unique_parse(marker: u128, seq: usize) -> String {
    format!(
        "SELECT /* PARSE_TEST_{marker}_{seq} */ order_amount FROM LOAD_TEST_ORDERS WHERE order_id = :1"
    )
}

pub const ROUND_TRIP_LOOKUP: &str = "SELECT order_id, customer_id, product_id, order_amount, \
    status, region, comments FROM LOAD_TEST_ORDERS WHERE order_id = :1";

pub const INDEX_CONTENTION_INSERT: &str = "INSERT INTO LOAD_TEST_ORDERS \
    (order_id, customer_id, product_id, order_date, order_amount, status, region, sales_rep, comments) \
    VALUES (load_test_order_seq.NEXTVAL, :1, :2, SYSDATE, :3, 'PENDING', 'Region0', 'Rep1', 'Index contention')";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_counts_differ_per_value() {
        assert_ne!(literal_count(1, 2), literal_count(1, 3));
        assert!(literal_count(42, 7).contains("customer_id = 42 AND region = 'Region7'"));
    }

    #[test]
    fn unique_parse_texts_do_not_repeat() {
        assert_ne!(unique_parse(1_700_000_000_000, 0), unique_parse(1_700_000_000_000, 1));
    }

    #[test]
    fn seed_counts_are_inlined() {
        assert!(seed_orders(50_000).ends_with("CONNECT BY LEVEL <= 50000"));
        assert!(seed_lock_targets(100).ends_with("CONNECT BY LEVEL <= 100"));
    }
}
