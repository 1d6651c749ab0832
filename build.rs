fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile the gateway service contract.
    // NOTE: type_attribute adds #[allow(missing_docs)] to all generated types
    // since protobuf-generated code cannot have doc comments at source
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        // Skip the transport-specific client constructor: its generated
        // `connect<D>(dst)` collides with the `Connect` rpc's method.
        .build_transport(false)
        .type_attribute(".", "#[allow(missing_docs)]")
        .compile(&["proto/gateway.proto"], &["proto"])?;

    Ok(())
}
