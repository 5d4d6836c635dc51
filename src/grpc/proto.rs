// Wire types and client stub generated from proto/scanner.proto by build.rs

tonic::include_proto!("byakugan.scanner");
