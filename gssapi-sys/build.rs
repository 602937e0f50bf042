use std::{env, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=wrapper.h");
    let include_paths = match pkg_config::Config::new().probe("krb5-gssapi") {
        Ok(lib) => lib.include_paths,
        Err(e) => {
            println!("cargo:warning=pkg-config could not find krb5-gssapi ({}), linking gssapi_krb5 directly", e);
            println!("cargo:rustc-link-lib=gssapi_krb5");
            Vec::new()
        }
    };
    let bindings = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_args(include_paths.iter().map(|p| format!("-I{}", p.display())))
        .allowlist_type("(OM_uint32|gss_.*)")
        .allowlist_function("(gss_.*|krb5_gss_.*)")
        .allowlist_var("(GSS_.*|gss_.*)")
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .generate()
        .expect("failed to generate gssapi bindings");
    let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is not set"));
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("failed to write bindings")
}
