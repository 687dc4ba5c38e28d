//! backoffice-pos entrypoint.

fn main() {
    if let Err(e) = backoffice_pos_lib::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
