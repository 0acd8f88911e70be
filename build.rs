// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("tomcat-patcher")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tomcat Patcher Contributors")
        .about("Apply a portal-assigned patch to a Tomcat instance and verify startup")
        .arg(
            Arg::new("token")
                .long("token")
                .required(true)
                .value_name("TOKEN")
                .help("Security token for the patch portal"),
        )
        .arg(
            Arg::new("dir")
                .long("dir")
                .value_name("PATH")
                .default_value("/tmp")
                .help("Directory to store downloaded patches"),
        )
        .arg(
            Arg::new("web")
                .long("web")
                .value_name("URL")
                .default_value("https://s3.amazonaws.com/longsight-patches/")
                .help("Website with patch files"),
        )
        .arg(
            Arg::new("ip")
                .long("ip")
                .value_name("ADDRESS")
                .help("Override automatic IP detection"),
        )
        .arg(
            Arg::new("wait-time")
                .long("wait-time")
                .value_name("SECONDS")
                .default_value("280")
                .help("Seconds to wait for Tomcat to start up"),
        )
        .arg(
            Arg::new("portal-url")
                .long("portal-url")
                .value_name("URL")
                .default_value("https://admin.longsight.com/longsight/json/patches")
                .help("Portal endpoint that hands out patches"),
        )
        .arg(
            Arg::new("report-url")
                .long("report-url")
                .value_name("URL")
                .default_value("https://admin.longsight.com/longsight/remote/patch/update")
                .help("Portal endpoint that receives results"),
        )
        .arg(
            Arg::new("defer-signature")
                .long("defer-signature")
                .value_name("TEXT")
                .default_value("Migration checksum mismatch")
                .help("Startup log text that means \"try again later\""),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log at debug level unless RUST_LOG says otherwise"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("tomcat-patcher.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
