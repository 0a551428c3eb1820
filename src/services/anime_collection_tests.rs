// src/services/anime_collection_tests.rs
//
// UNIT TESTS: Anime Collection
//
// PURPOSE:
// - Prove that scans track exactly the immediate subdirectories
// - Prove that watch notifications keep the folder map in sync
// - Prove that the watch lifecycle (start, errors, teardown) is observable
//
// INVARIANTS TESTED:
// - N subdirectories and M files yield exactly N folders
// - Adds are idempotent per name; repeated removals are not double counted
// - Clear and reload are refused while watching
// - Concurrent watch, load and clear fail at once instead of waiting for a scan
// - Watch handles are released once the watch scope ends

#[cfg(test)]
mod collection_tests {
    use std::fs;
    use std::ops::ControlFlow;
    use std::path::Path;
    use std::sync::{mpsc as std_mpsc, Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use crate::error::AppError;
    use crate::events::{FolderEvent, FolderEventType};
    use crate::infrastructure::directory_lister::MockDirectoryLister;
    use crate::infrastructure::fs_watcher::fake::FakeWatcherFactory;
    use crate::infrastructure::{
        DirectoryEntry, FilesystemBackends, FsOperation, Logger, WalkdirLister, WatchSource,
    };
    use crate::services::anime_collection::{AnimeCollection, ErrorReceiver, EventReceiver};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn root_with(dirs: &[&str], files: &[&str]) -> TempDir {
        let tmp = tempfile::tempdir().unwrap();
        for dir in dirs {
            fs::create_dir(tmp.path().join(dir)).unwrap();
        }
        for file in files {
            fs::write(tmp.path().join(file), b"").unwrap();
        }
        tmp
    }

    fn faked_collection(root: &Path) -> (AnimeCollection, FakeWatcherFactory) {
        let fake = FakeWatcherFactory::new();
        let backends = FilesystemBackends::new(Arc::new(WalkdirLister), Arc::new(fake.clone()));
        let collection =
            AnimeCollection::with_backends("Test", root, backends, Logger::new("test")).unwrap();
        (collection, fake)
    }

    /// Lister whose single scan blocks until released. The first receiver
    /// fires once the scan has started.
    fn blocking_lister() -> (MockDirectoryLister, std_mpsc::Receiver<()>, std_mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let mut lister = MockDirectoryLister::new();
        lister.expect_list_children().times(1).returning(move |_| {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            Ok(vec![Ok(DirectoryEntry::directory("Akira"))])
        });
        (lister, entered_rx, release_tx)
    }

    async fn next_event(events: &mut EventReceiver) -> FolderEvent {
        timeout(TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event output closed")
    }

    async fn next_error(errors: &mut ErrorReceiver) -> Option<AppError> {
        timeout(TIMEOUT, errors.recv())
            .await
            .expect("timed out waiting for the error queue")
    }

    /// Create `name` on disk and report it, then wait for its FOLDER_ADDED.
    /// Everything reported before it has been processed once this returns.
    async fn sentinel(
        collection: &AnimeCollection,
        fake: &FakeWatcherFactory,
        events: &mut EventReceiver,
        name: &str,
    ) {
        let path = collection.path().join(name);
        fs::create_dir(&path).unwrap();
        assert!(fake.emit(WatchSource::Root, &path, FsOperation::Create));

        let event = next_event(events).await;
        assert_eq!(event.event_type, FolderEventType::FolderAdded);
        assert_eq!(event.anime_folder.folder_name(), name);
    }

    async fn stop(collection: &AnimeCollection, scope: &CancellationToken) {
        scope.cancel();
        timeout(TIMEOUT, collection.wait())
            .await
            .expect("watch task did not stop");
    }

    // ------------------------------------------------------------------------
    // Construction and scanning
    // ------------------------------------------------------------------------

    #[test]
    fn test_new_rejects_invalid_roots() {
        let tmp = root_with(&[], &["file.txt"]);

        let missing = AnimeCollection::new("Missing", tmp.path().join("nope"), Logger::default());
        assert!(matches!(missing, Err(AppError::InvalidPath { .. })));

        let file = AnimeCollection::new("File", tmp.path().join("file.txt"), Logger::default());
        assert!(matches!(file, Err(AppError::InvalidPath { .. })));

        let unnamed = AnimeCollection::new("  ", tmp.path(), Logger::default());
        assert!(matches!(unnamed, Err(AppError::CollectionRejected { .. })));
    }

    #[test]
    fn test_load_tracks_only_directories() {
        let tmp = root_with(
            &["Akira", "Mushishi", "Planetes"],
            &["notes.txt", "Episode 01.mkv"],
        );
        let collection = AnimeCollection::new("Anime", tmp.path(), Logger::default()).unwrap();

        assert_eq!(collection.load_from_filesystem().unwrap(), 3);
        assert_eq!(collection.anime_folder_count(), 3);
        assert!(collection.anime_folder("notes.txt").is_none());

        let akira = collection.anime_folder("Akira").unwrap();
        assert_eq!(akira.path(), collection.path());
        assert_eq!(akira.full_path(), collection.path().join("Akira"));
    }

    #[test]
    fn test_load_continues_past_bad_entries() {
        let tmp = root_with(&[], &[]);
        let mut lister = MockDirectoryLister::new();
        lister.expect_list_children().times(1).returning(|_| {
            Ok(vec![
                Ok(DirectoryEntry::directory("Akira")),
                Err(AppError::Other("permission denied".to_string())),
                Ok(DirectoryEntry::file("notes.txt")),
                Ok(DirectoryEntry::directory("..")),
                Ok(DirectoryEntry::directory("Mushishi")),
            ])
        });
        let backends =
            FilesystemBackends::new(Arc::new(lister), Arc::new(FakeWatcherFactory::new()));
        let collection =
            AnimeCollection::with_backends("Mocked", tmp.path(), backends, Logger::default())
                .unwrap();

        assert_eq!(collection.load_from_filesystem().unwrap(), 2);
        assert!(collection.anime_folder("Akira").is_some());
        assert!(collection.anime_folder("Mushishi").is_some());
    }

    #[test]
    fn test_load_fails_when_root_cannot_be_listed() {
        let tmp = root_with(&[], &[]);
        let mut lister = MockDirectoryLister::new();
        lister.expect_list_children().returning(|_| {
            Err(AppError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        });
        let backends =
            FilesystemBackends::new(Arc::new(lister), Arc::new(FakeWatcherFactory::new()));
        let collection =
            AnimeCollection::with_backends("Mocked", tmp.path(), backends, Logger::default())
                .unwrap();

        assert!(matches!(
            collection.load_from_filesystem(),
            Err(AppError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_replaces_folders_with_new_ids() {
        let tmp = root_with(&["Akira"], &[]);
        let collection = AnimeCollection::new("Anime", tmp.path(), Logger::default()).unwrap();
        let mut events = collection.events();

        collection.load_from_filesystem().unwrap();
        let first = next_event(&mut events).await;
        assert_eq!(first.event_type, FolderEventType::FolderAdded);
        assert_eq!(first.collection_id, collection.id());

        collection.load_from_filesystem().unwrap();
        let removed = next_event(&mut events).await;
        let added = next_event(&mut events).await;

        assert_eq!(removed.event_type, FolderEventType::FolderRemoved);
        assert_eq!(removed.anime_folder.id(), first.anime_folder.id());
        assert_eq!(added.event_type, FolderEventType::FolderAdded);
        assert_ne!(added.anime_folder.id(), first.anime_folder.id());
        assert_eq!(collection.anime_folder_count(), 1);
    }

    #[test]
    fn test_iterate_stops_early() {
        let tmp = root_with(&["A", "B", "C"], &[]);
        let collection = AnimeCollection::new("Anime", tmp.path(), Logger::default()).unwrap();
        collection.load_from_filesystem().unwrap();

        let mut visited = 0;
        let completed = collection.iterate(|_| {
            visited += 1;
            if visited == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(!completed);
        assert_eq!(visited, 2);

        let mut all = Vec::new();
        assert!(collection.iterate(|folder| {
            all.push(folder.folder_name().to_string());
            ControlFlow::Continue(())
        }));
        all.sort();
        assert_eq!(all, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_clear_removes_everything() {
        let tmp = root_with(&["A", "B"], &[]);
        let collection = AnimeCollection::new("Anime", tmp.path(), Logger::default()).unwrap();
        collection.load_from_filesystem().unwrap();

        collection.clear().unwrap();
        assert_eq!(collection.anime_folder_count(), 0);
        assert!(collection.anime_folder("A").is_none());
    }

    // ------------------------------------------------------------------------
    // Watch lifecycle
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_wait_without_watch_returns_immediately() {
        let tmp = root_with(&[], &[]);
        let collection = AnimeCollection::new("Anime", tmp.path(), Logger::default()).unwrap();
        timeout(TIMEOUT, collection.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_watch_fails_without_side_effects() {
        let tmp = root_with(&["Akira"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let scope = CancellationToken::new();

        let _errors = collection.watch_filesystem(scope.clone(), true).unwrap();
        assert!(collection.is_watching());
        assert!(collection.is_watching_folders());
        assert_eq!(fake.open_handles(), 2);

        let second = collection.watch_filesystem(scope.clone(), true);
        assert!(matches!(second, Err(AppError::AlreadyWatching)));
        assert_eq!(fake.open_handles(), 2);
        assert_eq!(collection.anime_folder_count(), 1);

        stop(&collection, &scope).await;
        assert!(!collection.is_watching());
        assert!(!collection.is_watching_folders());
        assert_eq!(fake.open_handles(), 0);
        assert_eq!(fake.closed_handles(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_calls_during_watch_scan_fail_fast() {
        let tmp = root_with(&[], &[]);
        let (lister, entered, release) = blocking_lister();
        let fake = FakeWatcherFactory::new();
        let backends = FilesystemBackends::new(Arc::new(lister), Arc::new(fake.clone()));
        let collection =
            AnimeCollection::with_backends("Slow", tmp.path(), backends, Logger::default()).unwrap();
        let scope = CancellationToken::new();

        let starting = {
            let collection = collection.clone();
            let scope = scope.clone();
            tokio::task::spawn_blocking(move || collection.watch_filesystem(scope, false))
        };
        entered.recv_timeout(TIMEOUT).unwrap();

        assert!(collection.is_watching());
        assert!(matches!(
            collection.watch_filesystem(scope.clone(), false),
            Err(AppError::AlreadyWatching)
        ));
        assert!(matches!(
            collection.load_from_filesystem(),
            Err(AppError::CurrentlyWatched)
        ));
        assert!(matches!(collection.clear(), Err(AppError::CurrentlyWatched)));
        assert_eq!(fake.open_handles(), 1);

        release.send(()).unwrap();
        let _errors = starting.await.unwrap().unwrap();
        assert_eq!(collection.anime_folder_count(), 1);

        stop(&collection, &scope).await;
        assert!(!collection.is_watching());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_calls_during_load_fail_fast() {
        let tmp = root_with(&[], &[]);
        let (lister, entered, release) = blocking_lister();
        let fake = FakeWatcherFactory::new();
        let backends = FilesystemBackends::new(Arc::new(lister), Arc::new(fake.clone()));
        let collection =
            AnimeCollection::with_backends("Slow", tmp.path(), backends, Logger::default()).unwrap();

        let loading = {
            let collection = collection.clone();
            tokio::task::spawn_blocking(move || collection.load_from_filesystem())
        };
        entered.recv_timeout(TIMEOUT).unwrap();

        assert!(!collection.is_watching());
        assert!(matches!(
            collection.watch_filesystem(CancellationToken::new(), false),
            Err(AppError::CollectionBusy)
        ));
        assert!(matches!(
            collection.load_from_filesystem(),
            Err(AppError::CollectionBusy)
        ));
        assert_eq!(fake.open_handles(), 0);

        release.send(()).unwrap();
        assert_eq!(loading.await.unwrap().unwrap(), 1);

        // Back to idle: a later clear goes through.
        collection.clear().unwrap();
        assert_eq!(collection.anime_folder_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_and_load_refused_while_watching() {
        let tmp = root_with(&["A", "B"], &[]);
        let (collection, _fake) = faked_collection(tmp.path());
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), false).unwrap();

        assert!(matches!(collection.clear(), Err(AppError::CurrentlyWatched)));
        assert!(matches!(
            collection.load_from_filesystem(),
            Err(AppError::CurrentlyWatched)
        ));
        assert_eq!(collection.anime_folder_count(), 2);

        stop(&collection, &scope).await;
        collection.clear().unwrap();
        assert_eq!(collection.anime_folder_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_installs_folder_watches() {
        let tmp = root_with(&["A", "B"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), true).unwrap();

        assert_eq!(fake.watched_paths(WatchSource::Root), vec![collection.path().to_path_buf()]);
        assert_eq!(
            fake.watched_paths(WatchSource::Folder),
            vec![collection.path().join("A"), collection.path().join("B")]
        );

        stop(&collection, &scope).await;
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_created_directory_is_added_once() {
        let tmp = root_with(&["Existing"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let mut events = collection.events();
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), true).unwrap();
        assert_eq!(next_event(&mut events).await.anime_folder.folder_name(), "Existing");

        let created = collection.path().join("Monster");
        fs::create_dir(&created).unwrap();
        assert!(fake.emit(WatchSource::Root, &created, FsOperation::Create));
        assert!(fake.emit(WatchSource::Root, &created, FsOperation::Create));

        let added = next_event(&mut events).await;
        assert_eq!(added.event_type, FolderEventType::FolderAdded);
        assert_eq!(added.anime_folder.folder_name(), "Monster");

        sentinel(&collection, &fake, &mut events, "Sentinel").await;
        assert_eq!(collection.anime_folder_count(), 3);
        assert_eq!(
            collection.anime_folder("Monster").unwrap().id(),
            added.anime_folder.id()
        );
        assert!(fake
            .watched_paths(WatchSource::Folder)
            .contains(&created));

        stop(&collection, &scope).await;
    }

    #[tokio::test]
    async fn test_created_file_is_ignored() {
        let tmp = root_with(&[], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let mut events = collection.events();
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), false).unwrap();

        let file = collection.path().join("Episode 01.mkv");
        fs::write(&file, b"").unwrap();
        assert!(fake.emit(WatchSource::Root, &file, FsOperation::Create));
        assert!(fake.emit(WatchSource::Root, &file, FsOperation::Write));

        sentinel(&collection, &fake, &mut events, "Sentinel").await;
        assert_eq!(collection.anime_folder_count(), 1);

        stop(&collection, &scope).await;
    }

    #[tokio::test]
    async fn test_repeated_removal_is_not_double_counted() {
        let tmp = root_with(&["Akira", "Mushishi"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let mut events = collection.events();
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), true).unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        let akira = collection.path().join("Akira");
        let akira_id = collection.anime_folder("Akira").unwrap().id();
        fs::remove_dir(&akira).unwrap();
        assert!(fake.emit(WatchSource::Root, &akira, FsOperation::Remove));
        assert!(fake.emit(WatchSource::Root, &akira, FsOperation::Remove));
        assert!(fake.emit(WatchSource::Root, &akira, FsOperation::Rename));

        let removed = next_event(&mut events).await;
        assert_eq!(removed.event_type, FolderEventType::FolderRemoved);
        assert_eq!(removed.anime_folder.id(), akira_id);

        sentinel(&collection, &fake, &mut events, "Sentinel").await;
        assert_eq!(collection.anime_folder_count(), 2);
        assert!(collection.anime_folder("Akira").is_none());
        assert!(collection.iterate(|folder| {
            assert_ne!(folder.folder_name(), "Akira");
            ControlFlow::Continue(())
        }));
        assert!(!fake.watched_paths(WatchSource::Folder).contains(&akira));

        stop(&collection, &scope).await;
    }

    #[tokio::test]
    async fn test_renamed_folder_is_replaced() {
        let tmp = root_with(&["Old Name"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let mut events = collection.events();
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), false).unwrap();
        next_event(&mut events).await;

        let old = collection.path().join("Old Name");
        let new = collection.path().join("New Name");
        fs::rename(&old, &new).unwrap();
        assert!(fake.emit(WatchSource::Root, &old, FsOperation::Rename));
        assert!(fake.emit(WatchSource::Root, &new, FsOperation::Create));

        assert_eq!(next_event(&mut events).await.event_type, FolderEventType::FolderRemoved);
        let added = next_event(&mut events).await;
        assert_eq!(added.event_type, FolderEventType::FolderAdded);
        assert_eq!(added.anime_folder.folder_name(), "New Name");

        stop(&collection, &scope).await;
    }

    #[tokio::test]
    async fn test_folder_content_changes_are_reported() {
        let tmp = root_with(&["Akira"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let mut events = collection.events();
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), true).unwrap();
        let akira = next_event(&mut events).await.anime_folder;

        let episode = akira.full_path().join("Episode 01.mkv");
        assert!(fake.emit(WatchSource::Folder, &episode, FsOperation::Create));

        let modified = next_event(&mut events).await;
        assert_eq!(modified.event_type, FolderEventType::FolderContentModified);
        assert_eq!(modified.anime_folder.id(), akira.id());

        // Writes inside a folder are not content changes.
        assert!(fake.emit(WatchSource::Folder, &episode, FsOperation::Write));
        sentinel(&collection, &fake, &mut events, "Sentinel").await;
        assert_eq!(collection.anime_folder_count(), 2);

        stop(&collection, &scope).await;
    }

    #[tokio::test]
    async fn test_no_folder_watches_unless_requested() {
        let tmp = root_with(&["Akira"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let scope = CancellationToken::new();
        let _errors = collection.watch_filesystem(scope.clone(), false).unwrap();

        assert_eq!(fake.open_handles(), 1);
        assert!(fake.watched_paths(WatchSource::Folder).is_empty());
        assert!(!fake.emit(
            WatchSource::Folder,
            &collection.path().join("Akira").join("Episode 01.mkv"),
            FsOperation::Create
        ));

        stop(&collection, &scope).await;
    }

    // ------------------------------------------------------------------------
    // Error reporting
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_root_errors_are_reported_and_watch_continues() {
        let tmp = root_with(&[], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        let mut events = collection.events();
        let scope = CancellationToken::new();
        let mut errors = collection.watch_filesystem(scope.clone(), true).unwrap();

        fake.emit_error(WatchSource::Folder, "folder hiccup");
        fake.emit_error(WatchSource::Root, "root hiccup");

        let reported = next_error(&mut errors).await.unwrap();
        assert!(reported.to_string().contains("root hiccup"));

        sentinel(&collection, &fake, &mut events, "Sentinel").await;
        assert!(collection.is_watching());

        stop(&collection, &scope).await;
        assert!(next_error(&mut errors).await.is_none());
    }

    #[tokio::test]
    async fn test_close_failures_are_reported() {
        let tmp = root_with(&["Akira"], &[]);
        let (collection, fake) = faked_collection(tmp.path());
        fake.fail_on_close();
        let scope = CancellationToken::new();
        let mut errors = collection.watch_filesystem(scope.clone(), true).unwrap();

        stop(&collection, &scope).await;

        let mut reported = 0;
        while let Some(err) = next_error(&mut errors).await {
            assert!(matches!(err, AppError::Watch(_)));
            reported += 1;
        }
        assert_eq!(reported, 2);
        assert!(!collection.is_watching());
    }

    #[tokio::test]
    async fn test_clean_shutdown_closes_error_queue_empty() {
        let tmp = root_with(&["Akira"], &[]);
        let (collection, _fake) = faked_collection(tmp.path());
        let scope = CancellationToken::new();
        let mut errors = collection.watch_filesystem(scope.clone(), true).unwrap();

        stop(&collection, &scope).await;
        assert!(next_error(&mut errors).await.is_none());
    }
}
