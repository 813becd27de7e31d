// Integration tests module

mod integration {
    mod support;

    mod environment_test;
    mod metrics_test;
    mod monitoring_test;
    #[cfg(unix)]
    mod supervisor_test;
}
