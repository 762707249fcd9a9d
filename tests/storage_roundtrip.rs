use hltoken::oauth::{FileRecordStorage, RecordStorage, TokenRecord};
use proptest::prelude::*;

fn arb_record() -> impl Strategy<Value = TokenRecord> {
    (
        "[A-Za-z0-9._-]{1,64}",
        proptest::option::of("[A-Za-z0-9._-]{1,64}"),
        0i64..200_000,
        0i64..4_000_000_000,
        proptest::option::of("[A-Za-z0-9]{1,24}"),
        proptest::collection::btree_map("x[A-Za-z]{1,10}", "[ -~]{0,20}", 0..4),
    )
        .prop_map(|(access, refresh, expires_in, issued_at, location, extras)| {
            let mut record = TokenRecord::new(access, refresh, expires_in, issued_at);
            record.location_id = location;
            for (k, v) in extras {
                record.extra.insert(k, serde_json::Value::from(v));
            }
            record
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn file_storage_round_trips(record in arb_record()) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileRecordStorage::new(dir.path().join("tokens.json"));

        storage.save(&record).unwrap();
        prop_assert_eq!(storage.load().unwrap(), Some(record));
    }

    #[test]
    fn last_save_wins(first in arb_record(), second in arb_record()) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileRecordStorage::new(dir.path().join("tokens.json"));

        storage.save(&first).unwrap();
        storage.save(&second).unwrap();
        prop_assert_eq!(storage.load().unwrap(), Some(second));
    }
}
