use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

mod cli_style;
mod sqlite_persistence;
mod user;

use cli_style::get_styles;
use user::UserManager;

use user::SqliteUserStore;

use rustyline::{
    completion::Completer,
    highlight::Highlighter,
    history::FileHistory,
    validate::Validator,
    CompletionType, Config, Editor, Helper,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    #[clap(value_parser = parse_path)]
    pub path: Option<PathBuf>,
}

#[derive(Parser)]
#[command(styles=get_styles(),name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Creates a user with the given handle.
    AddUser { user_handle: String },

    /// Creates a password authentication for the given user id.
    /// Fails if the user already has a password set.
    AddLogin {
        user_handle: String,
        password: String,
    },

    /// Change the password of a user, fails if no password was set.
    UpdateLogin {
        user_handle: String,
        password: String,
    },

    /// Deletes the password authentication for a given user.
    DeleteLogin { user_handle: String },

    /// Shows authentication information of a given user.
    Show { user_handle: String },

    /// Verifies the password of a given user, it doesn't make any
    /// persistent change, nor it creates any token, it just
    /// compares the password hash.
    CheckPassword {
        user_handle: String,
        password: String,
    },

    /// Shows all user handles.
    UserHandles,

    /// Shows the path of the current auth db.
    Where,

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

const PROMPT: &str = ">> ";

fn format_time(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs().to_string(),
        Err(_) => "?".to_string(),
    }
}

fn format_opt_time(time: Option<SystemTime>) -> String {
    match time {
        Some(time) => format_time(time),
        None => "never".to_string(),
    }
}

fn execute_command(
    line: String,
    user_manager: &mut UserManager,
    db_path: String,
) -> CommandExecutionResult {
    if line.is_empty() {
        return CommandExecutionResult::Ok;
    }

    let args =
        shlex::split(&line).unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

    let cli = InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

    match cli {
        Ok(cli) => {
            cli_style::print_command_echo(&line);
            match cli.command {
                InnerCommand::AddUser { user_handle } => match user_manager.add_user(&user_handle)
                {
                    Ok(user_id) => {
                        cli_style::print_success(&format!(
                            "Created user '{}' with id {}",
                            user_handle, user_id
                        ));
                    }
                    Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
                },
                InnerCommand::AddLogin {
                    user_handle,
                    password,
                } => {
                    if let Err(err) =
                        user_manager.create_password_credentials(&user_handle, password)
                    {
                        return CommandExecutionResult::Error(format!("{}", err));
                    }
                    cli_style::print_success(&format!("Password set for '{}'", user_handle));
                }
                InnerCommand::UpdateLogin {
                    user_handle,
                    password,
                } => {
                    if let Err(err) =
                        user_manager.update_password_credentials(&user_handle, password)
                    {
                        return CommandExecutionResult::Error(format!("{}", err));
                    }
                    cli_style::print_success(&format!("Password updated for '{}'", user_handle));
                }
                InnerCommand::DeleteLogin { user_handle } => {
                    if let Err(err) = user_manager.delete_password_credentials(&user_handle) {
                        return CommandExecutionResult::Error(format!("{}", err));
                    }
                    cli_style::print_success(&format!("Password deleted for '{}'", user_handle));
                }
                InnerCommand::Show { user_handle } => {
                    let user_credentials = match user_manager.get_user_credentials(&user_handle) {
                        Ok(Some(credentials)) => credentials,
                        Ok(None) => {
                            return CommandExecutionResult::Error(format!(
                                "User '{}' not found",
                                user_handle
                            ));
                        }
                        Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
                    };

                    cli_style::print_section_header("User Credentials");
                    cli_style::print_key_value("User id", &user_credentials.user_id.to_string());
                    cli_style::print_key_value("Handle", &user_handle);
                    match &user_credentials.username_password {
                        Some(password_credentials) => {
                            cli_style::print_key_value(
                                "Hasher",
                                &password_credentials.hasher.to_string(),
                            );
                            cli_style::print_key_value(
                                "Password set",
                                &format_time(password_credentials.created),
                            );
                            cli_style::print_key_value(
                                "Last login",
                                &format_opt_time(password_credentials.last_used),
                            );
                        }
                        None => cli_style::print_empty_list("no password set"),
                    }
                    cli_style::print_section_footer();

                    cli_style::print_section_header("Auth Tokens");
                    match user_manager.get_user_tokens(&user_handle) {
                        Ok(tokens) if tokens.is_empty() => {
                            cli_style::print_empty_list("no active tokens");
                        }
                        Ok(tokens) => {
                            let mut table =
                                cli_style::TableBuilder::new(vec!["Token", "Created", "Last used"]);
                            let rows: Vec<(String, String, String)> = tokens
                                .iter()
                                .map(|token| {
                                    (
                                        token.value.0.clone(),
                                        format_time(token.created),
                                        format_opt_time(token.last_used),
                                    )
                                })
                                .collect();
                            for (value, created, last_used) in rows.iter() {
                                table.add_row(vec![
                                    value.as_str(),
                                    created.as_str(),
                                    last_used.as_str(),
                                ]);
                            }
                            table.print();
                        }
                        Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
                    }
                    cli_style::print_section_footer();
                }
                InnerCommand::UserHandles => {
                    match user_manager.get_all_user_handles() {
                        Ok(handles) => {
                            cli_style::print_section_header("Users");
                            if handles.is_empty() {
                                cli_style::print_empty_list("no users yet");
                            } else {
                                for handle in handles.iter() {
                                    cli_style::print_list_item(handle, 1);
                                }
                            }
                            cli_style::print_section_footer();
                        }
                        Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
                    };
                }
                InnerCommand::Where => {
                    cli_style::print_key_value_highlight("Database", &db_path);
                }
                InnerCommand::CheckPassword {
                    user_handle,
                    password,
                } => {
                    let user_credentials = match user_manager.get_user_credentials(&user_handle) {
                        Ok(Some(x)) => x,
                        Ok(None) => {
                            return CommandExecutionResult::Error(format!(
                                "User {} not found.",
                                user_handle
                            ));
                        }
                        Err(err) => return CommandExecutionResult::Error(format!("{}", err)),
                    };
                    let password_credentials = match user_credentials.username_password {
                        Some(x) => x,
                        None => {
                            return CommandExecutionResult::Error(format!(
                                "User {} has no password set.",
                                user_handle
                            ));
                        }
                    };
                    match password_credentials.hasher.verify(
                        password,
                        password_credentials.hash,
                        password_credentials.salt,
                    ) {
                        Ok(true) => cli_style::print_success("The password provided is correct!"),
                        Ok(false) => cli_style::print_warning("Wrong password."),
                        Err(err) => {
                            return CommandExecutionResult::Error(format!(
                                "Could not verify the password, something went wrong: {}",
                                err
                            ));
                        }
                    }
                }
                InnerCommand::Exit => return CommandExecutionResult::Exit,
            }
        }

        Err(e) => {
            if let Err(_) = e.print() {
                println!("{}", e);
            }
        }
    }
    CommandExecutionResult::Ok
}

#[derive(rustyline_derive::Hinter)]
struct MyHelper {
    commands_names: Vec<String>,
}

impl MyHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        MyHelper { commands_names }
    }
}

impl Completer for MyHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(" ") {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .map(|c| c.to_string())
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for MyHelper {}
impl Validator for MyHelper {}
impl Helper for MyHelper {}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let auth_store_file_path = match cli_args.path {
        Some(path) => path,
        None => SqliteUserStore::infer_path().with_context(|| {
            "Could not infer UserStore DB file path, please specify it explicitly."
        })?,
    };
    let user_store = SqliteUserStore::new(auth_store_file_path.clone())?;
    let mut user_manager = UserManager::new(Box::new(user_store));

    cli_style::print_welcome(&auth_store_file_path.display().to_string());
    InnerCli::command().print_long_help()?;

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<MyHelper, FileHistory>::with_config(config)?;

    let helper = MyHelper::new();
    rl.set_helper(Some(helper));

    loop {
        let readline = rl.readline(PROMPT);

        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                match execute_command(
                    line,
                    &mut user_manager,
                    auth_store_file_path.display().to_string(),
                ) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => {
                        break;
                    }
                    CommandExecutionResult::Error(err) => {
                        cli_style::print_error(&err);
                        continue;
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                break;
            }
            Err(e) => {
                println!("Error: {:?}", e);
                break;
            }
        }
    }
    cli_style::print_goodbye();
    Ok(())
}
