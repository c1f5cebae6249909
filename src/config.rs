//! Configuração do qr-attend carregada a partir de `qr-attend.toml`.
//!
//! A struct [`AgentConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente (`AIRTABLE_API_KEY`, `AIRTABLE_BASE_ID`,
//! `AIRTABLE_TABLE_NAME`, `CHROMEDRIVER`, `WEBDRIVER_URL`) têm precedência sobre o arquivo.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "qr-attend.toml";

/// Configuração de nível superior carregada de `qr-attend.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// URL base do portal; os links reconstruídos são `{portal_url}?id={código}`.
    pub portal_url: String,

    /// Prefixo que todo link aceito precisa ter.
    pub link_prefix: String,

    /// Diferença fixa entre os códigos das sessões da manhã e da noite.
    pub evening_offset: u64,

    /// Diretório das imagens QR geradas.
    pub qr_code_dir: PathBuf,

    /// Diretório das capturas de tela de confirmação e de erro.
    pub screenshot_dir: PathBuf,

    /// Arquivo JSON-lines usado quando o Airtable não está configurado.
    pub records_file: PathBuf,

    pub webdriver: WebDriverConfig,

    pub portal: PortalSelectors,

    pub airtable: AirtableConfig,
}

/// Parâmetros do navegador automatizado.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Caminho explícito para o executável do chromedriver.
    pub binary: Option<PathBuf>,

    /// Endpoint WebDriver remoto já em execução; quando presente nenhum processo é iniciado.
    pub url: Option<String>,

    /// Executa o Chrome sem janela.
    pub headless: bool,

    /// Tempo máximo de carregamento de página, em segundos.
    pub page_load_timeout_secs: u64,

    /// Espera máxima por cada elemento do portal, em segundos.
    pub element_wait_secs: u64,

    /// Intervalo entre consultas durante uma espera, em milissegundos.
    pub poll_interval_ms: u64,

    /// Prazo total de uma tentativa, em segundos.
    pub attempt_deadline_secs: u64,

    /// Espera máxima até o chromedriver responder em `/status`, em segundos.
    pub startup_timeout_secs: u64,
}

/// Seletores da marcação do portal.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalSelectors {
    /// Atributo `name` do campo de usuário.
    pub username_field: String,
    /// Atributo `name` do campo de senha.
    pub password_field: String,
    /// Seletor CSS do botão de login.
    pub submit_button: String,
    /// Seletor CSS do botão que confirma a presença.
    pub proceed_button: String,
    /// XPath do título exibido na página de agradecimento.
    pub confirmation_marker: String,
}

/// Credenciais e destino da tabela Airtable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub table_name: String,
    pub api_url: String,
    /// Coluna que recebe o caminho do screenshot. `None` mantém o esquema
    /// original da tabela, que não tem essa coluna.
    pub screenshot_field: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            portal_url: "https://students.nsbm.ac.lk/attendence/index.php".to_string(),
            link_prefix: "https://students.nsbm.ac.lk/attendence/".to_string(),
            evening_offset: 800_504,
            qr_code_dir: PathBuf::from("qr_codes"),
            screenshot_dir: PathBuf::from("screenshots"),
            records_file: PathBuf::from("records.jsonl"),
            webdriver: WebDriverConfig::default(),
            portal: PortalSelectors::default(),
            airtable: AirtableConfig::default(),
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            binary: None,
            url: None,
            headless: true,
            page_load_timeout_secs: 30,
            element_wait_secs: 10,
            poll_interval_ms: 250,
            attempt_deadline_secs: 120,
            startup_timeout_secs: 10,
        }
    }
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            submit_button: "button[type='submit'].btn.btn-primary".to_string(),
            proceed_button: "button.btn.btn-primary[onclick='load_win();']".to_string(),
            confirmation_marker: "//h2[contains(text(), 'Thank you')]".to_string(),
        }
    }
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_id: String::new(),
            table_name: "tblZvUKVz1tW0MTvA".to_string(),
            api_url: "https://api.airtable.com/v0".to_string(),
            screenshot_field: None,
        }
    }
}

impl WebDriverConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn attempt_deadline(&self) -> Duration {
        Duration::from_secs(self.attempt_deadline_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

impl AirtableConfig {
    /// O Airtable só é usado quando a chave e a base estão definidas.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.base_id.is_empty()
    }
}

impl AgentConfig {
    /// Carrega a configuração de `qr-attend.toml` no diretório atual, ou do caminho dado.
    /// Usa valores padrão se o arquivo padrão não existir; um caminho explícito ausente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<AgentConfig>(&contents)?)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(key) = var("AIRTABLE_API_KEY") {
            self.airtable.api_key = key;
        }
        if let Some(base) = var("AIRTABLE_BASE_ID") {
            self.airtable.base_id = base;
        }
        if let Some(table) = var("AIRTABLE_TABLE_NAME") {
            self.airtable.table_name = table;
        }
        if let Some(binary) = var("CHROMEDRIVER") {
            self.webdriver.binary = Some(PathBuf::from(binary));
        }
        if let Some(url) = var("WEBDRIVER_URL") {
            self.webdriver.url = Some(url);
        }
    }
}
