fn main() {
    if let Err(err) = tomato_timer_lib::run() {
        eprintln!("tomato-timer: {err:?}");
        std::process::exit(1);
    }
}
