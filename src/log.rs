// BEDLAM LOGGING SURFACE
// INFO GOES TO STDOUT, WARNINGS TO STDERR. NO LOGGER STATE, NO LEVELS --
// THE ENGINE WARNS ONLY ON FALLBACK PATHS, SO VOLUME IS NEAR ZERO.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        println!("[BEDLAM] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        eprintln!("[BEDLAM WARN] {}", format_args!($($arg)*))
    };
}
