macro_rules! ensure_eq {
    ($a:expr, $b:expr) => {
        ensure!($a == $b)
    };
    ($a:expr, $b:expr, $($arg:tt)*) => {
        ensure!($a == $b, $($arg)*)
    };
}

// absolute path to the tests directory
macro_rules! tests_dir {
    () => {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests")
    };
    ($path:expr) => {
        tests_dir!().join($path)
    };
}

macro_rules! fixtures_dir {
    () => {
        tests_dir!("fixtures")
    };
    ($path:expr) => {
        fixtures_dir!().join($path)
    };
}

macro_rules! bug {
    ($($arg:tt)*) => {{
        eprintln!("BUG!");
        unreachable!($($arg)*)
    }};
}
