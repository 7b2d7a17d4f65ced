//! Interpreter loop sessions against a real POSIX shell

#![cfg(unix)]

use shellframe::{Arguments, CommandRequest, Interpreter, Session, SessionState, ShellError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session() -> Session {
    init_tracing();
    Session::local()
        .with_interpreter(Interpreter::posix())
        .with_command_timeout(Duration::from_secs(10))
        .build()
}

fn no_args() -> Arguments {
    Arguments::new()
}

#[tokio::test]
async fn test_output_is_exact() -> anyhow::Result<()> {
    let mut session = session();

    let stdout = session.run_command("printf 'a\\nb\\n'; printf 'no newline'", &no_args()).await?;
    assert_eq!(stdout, "a\nb\nno newline");

    let stdout = session.run_command("echo second", &no_args()).await?;
    assert_eq!(stdout, "second\n");
    assert_eq!(session.state(), SessionState::LoopReady);

    assert_eq!(session.disconnect().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_stderr_only_returns_empty_stdout() -> anyhow::Result<()> {
    let mut session = session();

    let result = session.execute(&CommandRequest::new("echo warning >&2")).await?;
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr, "warning\n");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_command_reports_prompt_message() -> anyhow::Result<()> {
    let mut session = session();

    let err = session
        .run_command("echo before; false", &no_args())
        .await
        .unwrap_err();
    let fault = err.execution().expect("execution fault");
    assert_eq!(fault.stdout, "before\n");
    assert_eq!(fault.prompt_message.as_deref(), Some("exit status 1"));
    assert_eq!(fault.exit_code, None);

    // The loop survives evaluation errors
    assert!(session.is_running());
    assert_eq!(session.run_command("echo still here", &no_args()).await?, "still here\n");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_exit_zero_restarts_on_next_call() -> anyhow::Result<()> {
    let mut session = session();
    session.run_command("SHELLFRAME_LEVEL=1", &no_args()).await?;

    let result = session.execute(&CommandRequest::new("echo bye; exit 0")).await?;
    assert_eq!(result.stdout, "bye\n");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(session.state(), SessionState::Terminated);

    // A fresh interpreter has lost the old variables
    let stdout = session
        .run_command("echo \"level=${SHELLFRAME_LEVEL:-unset}\"", &no_args())
        .await?;
    assert_eq!(stdout, "level=unset\n");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_background_job_does_not_delay_exit() -> anyhow::Result<()> {
    let mut session = session();

    let started = Instant::now();
    let result = session
        .execute(&CommandRequest::new("echo bye; sleep 5 & exit 0"))
        .await?;
    assert_eq!(result.stdout, "bye\n");
    assert_eq!(result.exit_code, Some(0));
    assert!(started.elapsed() < Duration::from_secs(2));

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_background_job_does_not_delay_disconnect() -> anyhow::Result<()> {
    let mut session = session();
    session.run_command("sleep 5 &", &no_args()).await?;

    let started = Instant::now();
    assert_eq!(session.disconnect().await?, 0);
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn test_nonzero_exit_tears_down_and_reconnects() -> anyhow::Result<()> {
    let mut session = session();

    let err = session.run_command("echo dying; exit 3", &no_args()).await.unwrap_err();
    match err {
        ShellError::Execution(fault) => {
            assert_eq!(fault.exit_code, Some(3));
            assert_eq!(fault.stdout, "dying\n");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);

    assert_eq!(session.run_command("echo reborn", &no_args()).await?, "reborn\n");
    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_state_persists_between_commands() -> anyhow::Result<()> {
    let mut session = session();

    session.run_command("X=42", &no_args()).await?;
    session.run_command("cd /", &no_args()).await?;
    let stdout = session.run_command("echo \"$X $(pwd)\"", &no_args()).await?;
    assert_eq!(stdout, "42 /\n");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_init_script_runs_first() -> anyhow::Result<()> {
    let mut session = Session::local()
        .with_interpreter(Interpreter::posix())
        .with_init_script("GREETING=hello\necho init noise")
        .build();

    let stdout = session.run_command("echo \"$GREETING\"", &no_args()).await?;
    assert_eq!(stdout, "hello\n");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_dash_parameters_reach_the_command() -> anyhow::Result<()> {
    let mut session = session();

    let arguments = Arguments::new().with("-Bar", "5").with_flag("-Flag");
    let stdout = session.run_command("printf '%s|'", &arguments).await?;
    assert_eq!(stdout, "-Bar|5|-Flag|");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_multiline_script() -> anyhow::Result<()> {
    let mut session = session();

    let script = "for i in 1 2 3; do\n  echo \"item $i\"\ndone";
    let stdout = session.run_command(script, &no_args()).await?;
    assert_eq!(stdout, "item 1\nitem 2\nitem 3\n");

    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_custom_sentinel() -> anyhow::Result<()> {
    let mut session = Session::local()
        .with_interpreter(Interpreter::posix())
        .with_sentinel("--end-of-command--")
        .build();

    assert_eq!(session.run_command("echo custom", &no_args()).await?, "custom\n");
    session.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_disconnect_returns_status() -> anyhow::Result<()> {
    let mut session = session();

    // Nothing running yet
    assert_eq!(session.disconnect().await?, 0);

    session.connect().await?;
    assert_eq!(session.state(), SessionState::LoopReady);
    assert_eq!(session.disconnect().await?, 0);
    assert_eq!(session.state(), SessionState::Disconnected);
    Ok(())
}
