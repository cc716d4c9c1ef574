use quicksilver::value::Value;
use quicksilver::{IoHandle, IoHandleConfig};

fn open() -> (tempfile::TempDir, IoHandle) {
    let dir = tempfile::tempdir().unwrap();
    let handle = IoHandle::open(dir.path().join("rs.db"), IoHandleConfig::default()).unwrap();
    handle.update(
        "CREATE TABLE widgets (uuid TEXT PRIMARY KEY, name TEXT, qty INTEGER, price REAL)",
        &[],
    );
    (dir, handle)
}

#[test]
fn cursor_iterates_rows_in_insertion_order() {
    let (_dir, handle) = open();
    handle.update(
        "INSERT INTO widgets (uuid, name, qty, price) VALUES (?, ?, ?, ?)",
        &[
            Value::Text("a".into()),
            Value::Text("bolt".into()),
            Value::Integer(10),
            Value::Double(0.5),
        ],
    );
    handle.update(
        "INSERT INTO widgets (uuid, name, qty, price) VALUES (?, ?, ?, ?)",
        &[
            Value::Text("b".into()),
            Value::Text("nut".into()),
            Value::Integer(20),
            Value::Double(0.25),
        ],
    );

    let mut rs = handle.query("SELECT name, qty, price FROM widgets ORDER BY name", &[]).unwrap();
    assert!(rs.next());
    assert_eq!(rs.text_named("name").as_deref(), Some("bolt"));
    assert_eq!(rs.int64_named("qty"), Some(10));
    assert_eq!(rs.double_named("price"), Some(0.5));

    assert!(rs.next());
    assert_eq!(rs.text_named("name").as_deref(), Some("nut"));

    assert!(!rs.next());
}

#[test]
fn query_with_no_matches_returns_a_cursor_that_steps_to_nothing() {
    let (_dir, handle) = open();
    let mut rs = handle.query("SELECT name FROM widgets", &[]).unwrap();
    assert!(!rs.next());
}

#[test]
fn closing_the_cursor_releases_the_lock_for_a_following_write() {
    let (_dir, handle) = open();
    {
        let mut rs = handle.query("SELECT name FROM widgets", &[]).unwrap();
        assert!(!rs.next());
        rs.close();
    }
    assert!(handle.update(
        "INSERT INTO widgets (uuid, name, qty, price) VALUES (?, ?, ?, ?)",
        &[
            Value::Text("c".into()),
            Value::Text("washer".into()),
            Value::Integer(1),
            Value::Double(0.1),
        ],
    ));
}

#[test]
fn multi_bind_expands_a_sequence_into_an_in_clause() {
    let (_dir, handle) = open();
    handle.update(
        "INSERT INTO widgets (uuid, name, qty, price) VALUES (?, ?, ?, ?)",
        &[
            Value::Text("a".into()),
            Value::Text("bolt".into()),
            Value::Integer(10),
            Value::Double(0.5),
        ],
    );
    handle.update(
        "INSERT INTO widgets (uuid, name, qty, price) VALUES (?, ?, ?, ?)",
        &[
            Value::Text("b".into()),
            Value::Text("nut".into()),
            Value::Integer(20),
            Value::Double(0.25),
        ],
    );

    let mut rs = handle
        .query(
            "SELECT name FROM widgets WHERE uuid IN (#?) ORDER BY name",
            &[Value::Sequence(vec![Value::Text("a".into()), Value::Text("b".into())])],
        )
        .unwrap();
    let mut names = Vec::new();
    while rs.next() {
        names.push(rs.text_named("name").unwrap());
    }
    assert_eq!(names, vec!["bolt".to_string(), "nut".to_string()]);
}
