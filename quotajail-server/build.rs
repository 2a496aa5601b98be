fn main() {
    // Compile protobuf files for gRPC support
    compile_protos();
}

fn compile_protos() {
    println!("cargo:rerun-if-changed=proto/quotajail.proto");

    if let Err(e) = tonic_prost_build::compile_protos("proto/quotajail.proto") {
        println!("cargo:warning=Failed to compile protobuf: {e}");
        println!("cargo:warning=Make sure protoc is installed:");
        println!("cargo:warning=  macOS: brew install protobuf");
        println!("cargo:warning=  Ubuntu: apt-get install protobuf-compiler");
        println!(
            "cargo:warning=  Or download from: https://github.com/protocolbuffers/protobuf/releases"
        );
        std::process::exit(1);
    }
}
