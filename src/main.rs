fn main() {
    let code = dk2nu_flux::run_cli();
    if code != 0 {
        std::process::exit(code);
    }
}
