fn main() {
    if let Err(err) = flowstate_lib::run() {
        eprintln!("flowstate: {err:#}");
        std::process::exit(1);
    }
}
