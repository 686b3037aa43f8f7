// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::time::Duration;

use anyhow::Result;
use common::{Harness, RESTORE, WAREHOUSE, data_keys, dump};
use icecodec::avro::ManifestContainer;
use icecodec::{read_descriptor, read_manifest, read_manifest_list};
use object_store::ObjectStore;
use pitlog::{Deadline, DeltaMode, FileKind, RepositoryError, Scope, TableIdent};
use steward::{
    BackupOptions, Catalog, ErrorKind, MemoryCatalog, RegisterAs, RestoreOptions, StewardError,
    register_restored,
};

#[tokio::test]
async fn test_first_and_incremental_backups() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(
        &mut orders,
        &[("a.parquet", b"aaaa".as_slice()), ("b.parquet", b"bbbb".as_slice())],
        &[],
    )
    .await?;

    let backup = h.backup_executor();
    let scope = Scope::table("prod", &orders.ident);
    let first = backup.run(&BackupOptions::new("orders", scope.clone())).await?;
    assert_eq!(first.parent, None);
    assert_eq!(first.tables, vec![orders.ident.clone()]);

    let repo = h.repositories().open("orders").await?;
    let pit1 = repo.load_pit(&first.pit_id).await?;
    assert_eq!(pit1.parent, None);
    assert_eq!(
        data_keys(pit1.added.iter().map(|e| e.path.as_str())),
        vec!["data/a.parquet", "data/b.parquet"]
    );
    assert!(pit1.added.iter().any(|e| e.path == "metadata/v1.metadata.json"));
    assert!(pit1.modified.is_empty() && pit1.deleted.is_empty());
    assert_eq!(first.stored, pit1.added.len());
    assert_eq!(pit1.tables[0].descriptor_key, "metadata/v1.metadata.json");

    h.commit(
        &mut orders,
        &[("b.parquet", b"bbbb".as_slice()), ("c.parquet", b"cccc".as_slice())],
        &[],
    )
    .await?;
    let second = backup.run(&BackupOptions::new("orders", scope)).await?;
    assert_eq!(second.parent.as_ref(), Some(&first.pit_id));

    let repo = h.repositories().open("orders").await?;
    assert_eq!(repo.last_pit(), Some(&second.pit_id));
    let pit2 = repo.load_pit(&second.pit_id).await?;
    assert_eq!(data_keys(pit2.added.iter().map(|e| e.path.as_str())), vec!["data/c.parquet"]);
    assert_eq!(data_keys(pit2.deleted.iter().map(|e| e.path.as_str())), vec!["data/a.parquet"]);

    let now = repo.accumulate(&second.pit_id, &Deadline::none()).await?;
    assert_eq!(data_keys(now.paths()), vec!["data/b.parquet", "data/c.parquet"]);
    assert!(now.contains("metadata/v1.metadata.json"));
    assert!(now.contains("metadata/v2.metadata.json"));

    let then = repo.accumulate(&first.pit_id, &Deadline::none()).await?;
    assert_eq!(data_keys(then.paths()), vec!["data/a.parquet", "data/b.parquet"]);
    Ok(())
}

#[tokio::test]
async fn test_unchanged_table_gives_empty_pit() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;

    let backup = h.backup_executor();
    let options = BackupOptions::new("orders", Scope::table("prod", &orders.ident));
    let first = backup.run(&options).await?;
    let again = backup.run(&options).await?;

    assert_eq!(again.parent.as_ref(), Some(&first.pit_id));
    assert_eq!((again.counts.added, again.counts.modified, again.counts.deleted), (0, 0, 0));
    assert_eq!(again.stored, 0);
    assert_eq!(again.bytes_stored, 0);
    Ok(())
}

#[tokio::test]
async fn test_historical_restore_rewrites_paths() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(
        &mut orders,
        &[("a.parquet", b"aaaa".as_slice()), ("b.parquet", b"bbbb".as_slice())],
        &[],
    )
    .await?;
    let backup = h.backup_executor();
    let options = BackupOptions::new("orders", Scope::table("prod", &orders.ident));
    let first = backup.run(&options).await?;
    h.commit(
        &mut orders,
        &[("b.parquet", b"bbbb".as_slice()), ("c.parquet", b"cccc".as_slice())],
        &[],
    )
    .await?;
    _ = backup.run(&options).await?;

    let target = format!("{RESTORE}/orders");
    let outcome = h
        .restore_executor()
        .run(&RestoreOptions::new("orders", &target).at_pit(first.pit_id.clone()))
        .await?;
    assert_eq!(outcome.pit_id, first.pit_id);
    assert_eq!(outcome.tables.len(), 1);

    let table = &outcome.tables[0];
    assert_eq!(table.location, target);
    assert_eq!(table.metadata_location, format!("{target}/metadata/v1.metadata.json"));
    assert_eq!(table.files, outcome.files_written);
    assert_eq!(h.get(&format!("{target}/data/a.parquet")).await?, b"aaaa");
    assert_eq!(h.get(&format!("{target}/data/b.parquet")).await?, b"bbbb");
    assert!(!h.exists(&format!("{target}/data/c.parquet")).await?);

    let refs = read_descriptor(&h.get(&table.metadata_location).await?)?;
    assert_eq!(refs.location, target);
    assert_eq!(refs.manifest_lists, vec![format!("{target}/metadata/snap-1.avro")]);

    let manifest = h.get(&format!("{target}/metadata/m-1.avro")).await?;
    let entries = read_manifest(&ManifestContainer::decode(&manifest)?)?;
    let paths: Vec<_> = entries.iter().map(|e| e.file_path.as_str()).collect();
    assert_eq!(
        paths,
        vec![format!("{target}/data/a.parquet"), format!("{target}/data/b.parquet")]
    );
    Ok(())
}

#[tokio::test]
async fn test_restore_in_place_is_byte_identical() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;
    h.commit(
        &mut orders,
        &[("a.parquet", b"aaaa".as_slice()), ("b.parquet", b"bbbb".as_slice())],
        &[],
    )
    .await?;
    _ = h
        .backup_executor()
        .run(&BackupOptions::new("orders", Scope::table("prod", &orders.ident)))
        .await?;

    let original = dump(&h.warehouse).await?;
    for key in original.keys() {
        h.remove(&format!("{WAREHOUSE}/{key}")).await?;
    }

    let outcome = h
        .restore_executor()
        .run(&RestoreOptions::new("orders", &orders.location))
        .await?;
    assert_eq!(outcome.tables[0].metadata_location, orders.metadata_location());

    let restored = dump(&h.warehouse).await?;
    assert_eq!(restored.len(), outcome.files_written);
    for (key, bytes) in &restored {
        assert_eq!(original.get(key), Some(bytes), "{key} differs after restore");
    }
    // The expired snapshot's manifest list is not part of the live set
    assert!(!restored.contains_key("sales/orders/metadata/snap-1.avro"));
    assert!(restored.contains_key("sales/orders/metadata/v1.metadata.json"));
    Ok(())
}

#[tokio::test]
async fn test_position_deletes_follow_the_table() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(
        &mut orders,
        &[("a.parquet", b"aaaa".as_slice())],
        &[("del-1.parquet", "a.parquet")],
    )
    .await?;
    let first = h
        .backup_executor()
        .run(&BackupOptions::new("orders", Scope::table("prod", &orders.ident)))
        .await?;

    let repo = h.repositories().open("orders").await?;
    let pit = repo.load_pit(&first.pit_id).await?;
    let delete = pit
        .added
        .iter()
        .find(|e| e.path == "data/del-1.parquet")
        .expect("delete file captured");
    assert_eq!(delete.kind, FileKind::PositionDeletes);
    assert_eq!(delete.referenced_by.as_deref(), Some("metadata/m-1.avro"));

    let target = format!("{RESTORE}/orders");
    _ = h.restore_executor().run(&RestoreOptions::new("orders", &target)).await?;
    assert!(h.exists(&format!("{target}/data/del-1.parquet")).await?);

    let manifest = h.get(&format!("{target}/metadata/m-1.avro")).await?;
    let entries = read_manifest(&ManifestContainer::decode(&manifest)?)?;
    let referenced: Vec<_> = entries
        .iter()
        .filter_map(|e| e.referenced_data_file.as_deref())
        .collect();
    assert_eq!(referenced, vec![format!("{target}/data/a.parquet")]);

    // The new location is shorter, so the rewritten delete file shrinks
    let original = h.get(&format!("{}/data/del-1.parquet", orders.location)).await?;
    let restored = h.get(&format!("{target}/data/del-1.parquet")).await?;
    assert!(restored.len() < original.len());

    for entry in &entries {
        let object = h.get(&entry.file_path).await?;
        assert_eq!(
            entry.file_size_in_bytes,
            object.len() as i64,
            "{} recorded with a stale length",
            entry.file_path
        );
    }

    let list = h.get(&format!("{target}/metadata/snap-1.avro")).await?;
    let manifests = read_manifest_list(&ManifestContainer::decode(&list)?)?;
    assert_eq!(manifests.len(), 1);
    for listed in &manifests {
        assert_eq!(listed.manifest_path, format!("{target}/metadata/m-1.avro"));
        assert_eq!(listed.manifest_length, manifest.len() as i64);
    }
    Ok(())
}

#[tokio::test]
async fn test_restore_refuses_occupied_target() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;
    _ = h
        .backup_executor()
        .run(&BackupOptions::new("orders", Scope::table("prod", &orders.ident)))
        .await?;

    let restore = h.restore_executor();
    let err = restore
        .run(&RestoreOptions::new("orders", &orders.location))
        .await
        .expect_err("table files are still there");
    assert_eq!(err.kind(), ErrorKind::TargetNotEmpty);

    let outcome = restore
        .run(&RestoreOptions::new("orders", &orders.location).with_overwrite(true))
        .await?;
    assert_eq!(outcome.tables.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_content_fails_restore_before_descriptors() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(
        &mut orders,
        &[("a.parquet", b"aaaa".as_slice()), ("b.parquet", b"bbbb".as_slice())],
        &[],
    )
    .await?;
    let first = h
        .backup_executor()
        .run(&BackupOptions::new("orders", Scope::table("prod", &orders.ident)))
        .await?;

    let repo = h.repositories().open("orders").await?;
    let files = repo.accumulate(&first.pit_id, &Deadline::none()).await?;
    let checksum = &files.get("data/a.parquet").expect("live data file").checksum;
    _ = h
        .backups
        .put(&repo.content_path(checksum)?, bytes::Bytes::from_static(b"rot!").into())
        .await?;

    let target = format!("{RESTORE}/orders");
    let err = h
        .restore_executor()
        .run(&RestoreOptions::new("orders", &target))
        .await
        .expect_err("content no longer matches its checksum");
    assert_eq!(err.kind(), ErrorKind::PartialRestore);
    assert_eq!(err.root().kind(), ErrorKind::ChecksumMismatch);
    let StewardError::PartialRestore { pit_id, total, .. } = &err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(pit_id, first.pit_id.as_str());
    assert_eq!(*total, files.len());
    assert!(!h.exists(&format!("{target}/metadata/v1.metadata.json")).await?);
    // Parents wait for their children, so the failed data stage stops them too
    assert!(!h.exists(&format!("{target}/metadata/m-1.avro")).await?);
    assert!(!h.exists(&format!("{target}/metadata/snap-1.avro")).await?);
    Ok(())
}

#[tokio::test]
async fn test_scope_is_frozen() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;
    let backup = h.backup_executor();
    _ = backup
        .run(&BackupOptions::new("orders", Scope::table("prod", &orders.ident)))
        .await?;

    let refunds = TableIdent::new("sales", "refunds");
    let err = backup
        .run(&BackupOptions::new("orders", Scope::table("prod", &refunds)))
        .await
        .expect_err("repository belongs to sales.orders");
    assert_eq!(err.kind(), ErrorKind::ScopeMismatch);
    Ok(())
}

#[tokio::test]
async fn test_missing_data_file_strict_and_lenient() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(
        &mut orders,
        &[("a.parquet", b"aaaa".as_slice()), ("b.parquet", b"bbbb".as_slice())],
        &[],
    )
    .await?;
    let backup = h.backup_executor();
    let options = BackupOptions::new("orders", Scope::table("prod", &orders.ident));
    let first = backup.run(&options).await?;

    h.remove(&format!("{}/data/b.parquet", orders.location)).await?;

    let err = backup.run(&options).await.expect_err("strict mode");
    assert!(matches!(
        &err,
        StewardError::Repository(RepositoryError::UnreadableFiles(paths))
            if paths == &vec!["data/b.parquet".to_string()]
    ));

    let lenient = backup
        .run(&options.clone().with_delta_mode(DeltaMode::Lenient))
        .await?;
    assert_eq!(lenient.parent.as_ref(), Some(&first.pit_id));
    assert_eq!(lenient.carried_forward, vec!["data/b.parquet".to_string()]);
    assert_eq!((lenient.counts.added, lenient.counts.modified, lenient.counts.deleted), (0, 0, 0));

    let repo = h.repositories().open("orders").await?;
    let live = repo.accumulate(&lenient.pit_id, &Deadline::none()).await?;
    assert!(live.contains("data/b.parquet"));
    Ok(())
}

#[tokio::test]
async fn test_missing_descriptor_is_unavailable() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;
    h.remove(&orders.metadata_location()).await?;

    let err = h
        .backup_executor()
        .run(&BackupOptions::new("orders", Scope::table("prod", &orders.ident)))
        .await
        .expect_err("root descriptor is gone");
    assert_eq!(err.kind(), ErrorKind::TableUnavailable);

    let repo = h.repositories().open("orders").await?;
    assert!(repo.last_pit().is_none());
    Ok(())
}

#[tokio::test]
async fn test_expired_deadline_appends_nothing() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;

    let options = BackupOptions::new("orders", Scope::table("prod", &orders.ident))
        .with_deadline(Deadline::after(Duration::ZERO));
    let err = h.backup_executor().run(&options).await.expect_err("no time left");
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);

    let repo = h.repositories().open("orders").await?;
    assert!(repo.pits().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_database_backup_restore_and_register() -> Result<()> {
    let h = Harness::new()?;
    let mut orders = h.table("sales", "orders");
    let mut refunds = h.table("sales", "refunds");
    let mut people = h.table("hr", "people");
    h.commit(&mut orders, &[("a.parquet", b"aaaa".as_slice())], &[]).await?;
    h.commit(&mut refunds, &[("r.parquet", b"rrrr".as_slice())], &[]).await?;
    h.commit(&mut people, &[("p.parquet", b"pppp".as_slice())], &[]).await?;

    let first = h
        .backup_executor()
        .run(&BackupOptions::new("sales", Scope::database("prod", "sales")))
        .await?;
    assert_eq!(first.tables, vec![orders.ident.clone(), refunds.ident.clone()]);

    let repo = h.repositories().open("sales").await?;
    let live = repo.accumulate(&first.pit_id, &Deadline::none()).await?;
    assert_eq!(
        data_keys(live.paths()),
        vec!["orders/data/a.parquet", "refunds/data/r.parquet"]
    );
    assert!(live.paths().all(|p| p.starts_with("orders/") || p.starts_with("refunds/")));

    let target = format!("{RESTORE}/sales");
    let outcome = h
        .restore_executor()
        .run(&RestoreOptions::new("sales", &target))
        .await?;
    let locations: Vec<_> = outcome.tables.iter().map(|t| t.location.clone()).collect();
    assert_eq!(locations, vec![format!("{target}/orders"), format!("{target}/refunds")]);
    assert_eq!(h.get(&format!("{target}/refunds/data/r.parquet")).await?, b"rrrr");

    let dr = MemoryCatalog::new("dr");
    let names = register_restored(&dr, &outcome, &RegisterAs::Namespace("restored".to_string())).await?;
    assert_eq!(
        names,
        vec![TableIdent::new("restored", "orders"), TableIdent::new("restored", "refunds")]
    );
    let entry = dr.resolve(&TableIdent::new("restored", "refunds")).await?;
    assert_eq!(entry.metadata_location, format!("{target}/refunds/metadata/v1.metadata.json"));

    let single = register_restored(&dr, &outcome, &RegisterAs::Table(TableIdent::new("dr", "one"))).await;
    assert!(matches!(single, Err(StewardError::Config(_))));

    let taken = register_restored(h.catalog.as_ref(), &outcome, &RegisterAs::Original).await;
    assert_eq!(taken.map_err(|e| e.kind()).err(), Some(ErrorKind::Catalog));
    Ok(())
}
