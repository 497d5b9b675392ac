//! Client-side session: the console end of the framed protocol.
//!
//! Prompts for a name, sends it as the first envelope, then runs the
//! exchange loop: read a console line, send it tagged with the
//! server-assigned client ID, print the server's reply. The loop ends
//! on the quit command, console end-of-input, or the server closing
//! its side.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::connection::QUIT_COMMAND;
use crate::protocol::{read_frame, write_frame, ProtocolError, UNASSIGNED_ID};

/// Drive one client session over `stream`, reading commands from
/// `input` and writing prompts and server replies to `output`.
///
/// Server replies are printed with a `Server: ` preamble. Returns
/// cleanly when the server closes the connection.
pub async fn run_session<S, I, O>(
    stream: S,
    input: I,
    mut output: O,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut lines = input.lines();

    output.write_all(b"Enter your name, plz: ").await?;
    output.flush().await?;

    let Some(name) = lines.next_line().await? else {
        return Ok(());
    };
    write_frame(&mut writer, UNASSIGNED_ID, name.trim()).await?;

    // The welcome envelope carries the ID every later message is
    // tagged with.
    let Some(welcome) = read_frame(&mut reader).await? else {
        return Ok(());
    };
    let client_id = welcome.client_id;
    output
        .write_all(format!("Server: {}\n", welcome.text).as_bytes())
        .await?;

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        write_frame(&mut writer, client_id, &line).await?;

        let Some(reply) = read_frame(&mut reader).await? else {
            break;
        };
        output
            .write_all(format!("Server: {}\n", reply.text).as_bytes())
            .await?;

        if line.trim().eq_ignore_ascii_case(QUIT_COMMAND) {
            break;
        }
    }

    Ok(())
}
