//! Interface de linha de comando do qr-attend baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (convert, evening, mark,
//! variants, digit, render, records) e flags globais (--config, --verbose,
//! --json-logs).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::attempt::{AttemptRequest, Credentials};

/// qr-attend — recupera códigos de presença expirados e confirma no portal.
#[derive(Debug, Parser)]
#[command(name = "qr-attend", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML (padrão: ./qr-attend.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite os logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

/// Dados comuns a uma submissão de presença.
#[derive(Debug, Args)]
pub struct AttemptArgs {
    /// Link do QR code expirado (ou da sessão da manhã, para `evening`).
    pub link: String,

    /// Nome do módulo registrado no histórico.
    #[arg(long, short)]
    pub module: String,

    /// Usuário do portal.
    #[arg(long, short, env = "QR_ATTEND_USERNAME")]
    pub username: String,

    /// Senha do portal.
    #[arg(long, short, env = "QR_ATTEND_PASSWORD", hide_env_values = true)]
    pub password: String,
}

impl AttemptArgs {
    pub fn into_request(self) -> AttemptRequest {
        AttemptRequest {
            link: self.link,
            module_name: self.module,
            credentials: Credentials::new(self.username, self.password),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Converte um link expirado, gera o QR e marca a presença.
    Convert(AttemptArgs),

    /// Deriva o link da sessão da noite, gera o QR e marca a presença.
    Evening(AttemptArgs),

    /// Marca a presença com um link já convertido (ou da noite), sem gerar QR.
    Mark {
        /// Link convertido que será aberto no portal.
        link: String,

        /// Link original registrado no histórico.
        #[arg(long)]
        original: String,

        /// Registra o link como sessão da noite.
        #[arg(long, default_value_t = false)]
        evening: bool,

        /// Nome do módulo registrado no histórico.
        #[arg(long, short)]
        module: String,

        /// Usuário do portal.
        #[arg(long, short, env = "QR_ATTEND_USERNAME")]
        username: String,

        /// Senha do portal.
        #[arg(long, short, env = "QR_ATTEND_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Lista variações do link com dígitos finais distintos.
    Variants {
        link: String,

        /// Quantidade de variações (no máximo 9).
        #[arg(long, short, default_value_t = 5)]
        count: usize,
    },

    /// Troca o dígito final do código por um dígito escolhido.
    Digit {
        link: String,

        /// Dígito de 0 a 9.
        digit: u32,
    },

    /// Apenas gera um QR code para o conteúdo informado.
    Render {
        payload: String,

        /// Legenda registrada junto ao QR.
        #[arg(long)]
        label: Option<String>,
    },

    /// Consulta o histórico de presenças.
    Records {
        #[command(subcommand)]
        query: RecordsQuery,
    },
}

#[derive(Debug, Subcommand)]
pub enum RecordsQuery {
    /// Registros de hoje.
    Today,

    /// Registros de uma data (AAAA-MM-DD).
    Date { date: String },

    /// Registros de um módulo (nome exato).
    Module { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const LINK: &str = "https://students.nsbm.ac.lk/attendence/index.php?id=52202002751_84783";

    #[test]
    fn cli_parses_convert_subcommand() {
        let cli = Cli::parse_from([
            "qr-attend", "convert", LINK, "--module", "Networks", "--username", "kasun",
            "--password", "secret",
        ]);
        match cli.command {
            Command::Convert(args) => {
                let request = args.into_request();
                assert_eq!(request.link, LINK);
                assert_eq!(request.module_name, "Networks");
                assert_eq!(request.credentials.username, "kasun");
                assert_eq!(request.credentials.password, "secret");
            }
            _ => panic!("expected Convert command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "qr-attend",
            "--config",
            "custom.toml",
            "--verbose",
            "--json-logs",
            "variants",
            LINK,
        ]);
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Command::Variants { count, .. } => assert_eq!(count, 5),
            _ => panic!("expected Variants command"),
        }
    }

    #[test]
    fn cli_parses_records_queries() {
        let cli = Cli::parse_from(["qr-attend", "records", "date", "2026-10-17"]);
        assert!(matches!(
            cli.command,
            Command::Records { query: RecordsQuery::Date { ref date } } if date == "2026-10-17"
        ));

        let cli = Cli::parse_from(["qr-attend", "records", "module", "Networks"]);
        assert!(matches!(
            cli.command,
            Command::Records { query: RecordsQuery::Module { ref name } } if name == "Networks"
        ));
    }

    #[test]
    fn cli_parses_mark_subcommand() {
        let cli = Cli::parse_from([
            "qr-attend", "mark", "https://portal/?id=9_1", "--original", LINK, "--evening",
            "-m", "Networks", "-u", "kasun", "-p", "secret",
        ]);
        match cli.command {
            Command::Mark { link, original, evening, module, .. } => {
                assert_eq!(link, "https://portal/?id=9_1");
                assert_eq!(original, LINK);
                assert!(evening);
                assert_eq!(module, "Networks");
            }
            _ => panic!("expected Mark command"),
        }
    }

    #[test]
    fn cli_parses_digit() {
        let cli = Cli::parse_from(["qr-attend", "digit", LINK, "7"]);
        assert!(matches!(cli.command, Command::Digit { digit: 7, .. }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
