// src/services/task_planner_tests.rs
//
// UNIT TESTS: Task Planner
//
// INVARIANTS TESTED:
// - One task per folder, including folders that existed before start
// - Content changes replace the pending task; removals drop it
// - Stopping the planner cancels every pending task

#[cfg(test)]
mod planner_tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::{sleep, timeout};
    use tokio_util::sync::CancellationToken;

    use crate::error::AppError;
    use crate::infrastructure::fs_watcher::fake::FakeWatcherFactory;
    use crate::infrastructure::{FilesystemBackends, FsOperation, Logger, WalkdirLister, WatchSource};
    use crate::services::anime_library::{AnimeLibrary, LibraryConfig};
    use crate::services::task_planner::{TaskPlanner, TaskType};

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn until<F: Fn() -> bool>(condition: F) {
        timeout(TIMEOUT, async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_existing_folders_are_scheduled_once() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["Akira", "Mushishi"] {
            fs::create_dir(tmp.path().join(name)).unwrap();
        }
        let library = AnimeLibrary::new(LibraryConfig::default(), Logger::default());
        library.add_collection("Anime", tmp.path()).unwrap();
        library.load_from_filesystem().unwrap();

        let planner = TaskPlanner::new(library.clone(), Logger::default());
        let scope = CancellationToken::new();
        planner.start(scope.clone()).unwrap();
        assert!(planner.is_running());
        assert!(matches!(
            planner.start(scope.clone()),
            Err(AppError::AlreadyRunning)
        ));

        // The load events reach the planner as well, without duplicating tasks.
        until(|| planner.pending_count() == 2).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(planner.pending_count(), 2);

        let tasks = planner.pending_tasks();
        assert!(tasks.iter().all(|t| t.task_type == TaskType::ProcessAnimeFolder));
        assert!(tasks[0].created_at <= tasks[1].created_at);

        let next = planner.take_next().unwrap();
        assert_eq!(next.id, tasks[0].id);
        assert!(next.to_string().starts_with("Process anime folder: "));
        assert_eq!(planner.pending_count(), 1);

        scope.cancel();
        timeout(TIMEOUT, planner.wait()).await.unwrap();
        assert!(!planner.is_running());
        assert_eq!(planner.pending_count(), 0);
        assert!(next.is_cancelled());

        library.clear();
        library.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_changes_reschedule_and_removals_drop() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("Akira")).unwrap();

        let fake = FakeWatcherFactory::new();
        let backends = FilesystemBackends::new(Arc::new(WalkdirLister), Arc::new(fake.clone()));
        let library = AnimeLibrary::with_backends(LibraryConfig::default(), backends, Logger::default());
        let id = library.add_collection("Anime", tmp.path()).unwrap();
        let root = library.collection(id).unwrap().path().to_path_buf();

        let scope = CancellationToken::new();
        let planner = TaskPlanner::new(library.clone(), Logger::default());
        planner.start(scope.clone()).unwrap();
        let _errors = library.watch_filesystem(&scope, true).unwrap();

        until(|| planner.pending_count() == 1).await;
        let original = planner.pending_tasks().remove(0);
        assert_eq!(original.anime_folder.folder_name(), "Akira");

        assert!(fake.emit(
            WatchSource::Folder,
            &root.join("Akira").join("Episode 01.mkv"),
            FsOperation::Create
        ));
        until(|| original.is_cancelled()).await;
        until(|| planner.pending_count() == 1).await;
        let rescheduled = planner.pending_tasks().remove(0);
        assert_ne!(rescheduled.id, original.id);
        assert_eq!(rescheduled.anime_folder.id(), original.anime_folder.id());

        let akira = root.join("Akira");
        fs::remove_dir(&akira).unwrap();
        assert!(fake.emit(WatchSource::Root, &akira, FsOperation::Remove));
        until(|| planner.pending_count() == 0).await;
        assert!(rescheduled.is_cancelled());

        scope.cancel();
        timeout(TIMEOUT, planner.wait()).await.unwrap();
        library.clear();
        timeout(TIMEOUT, library.wait()).await.unwrap().unwrap();
    }
}
