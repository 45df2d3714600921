use codesearch::Settings;
use std::env;
use std::fs;
use tempfile::TempDir;

// Single test: it changes the process working directory and environment.
#[test]
fn test_workspace_discovery_and_env_override() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().canonicalize().unwrap();
    fs::create_dir_all(root.join(".codesearch")).unwrap();
    fs::write(
        root.join(".codesearch/settings.toml"),
        "[trace]\nmax_depth = 6\n\n[cache]\nmemory_capacity = 32\n",
    )
    .unwrap();
    let nested = root.join("src/api");
    fs::create_dir_all(&nested).unwrap();

    let original_dir = env::current_dir().unwrap();
    env::set_current_dir(&nested).unwrap();
    unsafe {
        env::set_var("CS_CACHE__MEMORY_CAPACITY", "8");
        env::set_var("CS_RESOLUTION__DEFAULT_MAX_RESULTS", "15");
    }

    let loaded = Settings::load();

    unsafe {
        env::remove_var("CS_CACHE__MEMORY_CAPACITY");
        env::remove_var("CS_RESOLUTION__DEFAULT_MAX_RESULTS");
    }
    env::set_current_dir(original_dir).unwrap();

    let settings = loaded.unwrap();
    assert_eq!(settings.workspace_root.as_deref(), Some(root.as_path()));
    // From the discovered file
    assert_eq!(settings.trace.max_depth, 6);
    // Environment wins over the file
    assert_eq!(settings.cache.memory_capacity, 8);
    assert_eq!(settings.resolution.default_max_results, 15);
    assert_eq!(settings.cache_dir(), root.join(".codesearch/cache"));
}
