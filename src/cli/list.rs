use anyhow::Result;
use clap::Args;
use tracing::info;

use girder_client::collection::{Collection, Params, SortDir, DEFAULT_SORT_FIELD};
use girder_client::config::Settings;
use girder_client::context::AppContext;
use girder_client::models::Record;

#[derive(Clone, Debug, Args)]
pub struct ListArg {
    /// Listing endpoint, e.g. `folder`, `item` or `collection`
    pub resource: String,
    /// Records per page (0 = everything in one page)
    #[arg(long)]
    pub limit: Option<usize>,
    /// Field to sort by
    #[arg(long, default_value = DEFAULT_SORT_FIELD)]
    pub sort: String,
    /// Sort descending
    #[arg(long)]
    pub desc: bool,
    /// Extra query parameter, e.g. `--param parentType=folder`
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
    /// Only keep records whose name contains this text (case-insensitive)
    #[arg(long)]
    pub name_contains: Option<String>,
    /// Number of pages to print
    #[arg(long, default_value_t = 1)]
    pub pages: usize,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

pub fn name_filter(needle: &str) -> impl Fn(&Record) -> bool + Send + Sync + 'static {
    let needle = needle.to_lowercase();
    move |record| {
        record
            .name()
            .is_some_and(|name| name.to_lowercase().contains(&needle))
    }
}

pub async fn run(ctx: AppContext, settings: &Settings, arg: ListArg) -> Result<()> {
    let dir = if arg.desc {
        SortDir::Descending
    } else {
        SortDir::Ascending
    };
    let mut collection = Collection::new(ctx, &arg.resource)
        .page_limit(arg.limit.unwrap_or(settings.page_limit))
        .sort(&arg.sort, dir);
    if let Some(ref needle) = arg.name_contains {
        collection = collection.filter(name_filter(needle));
    }

    let params: Params = arg.params.into_iter().collect();
    collection.fetch(params, true).await?;

    for page in 1..=arg.pages.max(1) {
        if page > 1 {
            if !collection.has_next_page() {
                break;
            }
            collection.fetch_next_page(Params::new()).await?;
        }

        println!("# page {} ({} records)", page, collection.len());
        for record in collection.records() {
            println!(
                "{}\t{}",
                record.id().unwrap_or_default(),
                record.name().unwrap_or_default()
            );
        }
    }

    info!(
        "Listed {} up to raw offset {}{}",
        arg.resource,
        collection.offset(),
        if collection.has_next_page() {
            " (more available)"
        } else {
            ""
        }
    );
    Ok(())
}
