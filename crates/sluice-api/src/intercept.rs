//! Multipart interception engine.
//!
//! Reads a multipart request body part by part. File parts are streamed to a
//! [`Destination`] and replaced by the fields describing where they went.
//! Value parts are copied through. The configured [`UploadProcessor`] sees
//! every stored file and may add fields of its own.

use std::collections::{BTreeMap, HashSet};

use axum::body::Body;
use bytes::Bytes;
use futures::TryStreamExt;
use http::{header, HeaderMap};
use sluice_core::constants::{LOCATOR_FIELD_SUFFIXES, RESERVED_FIELD_SUFFIXES};
use sluice_core::{AppError, FieldSigner, RequestContext};
use sluice_processing::{MultipartWriter, ProcessingError, UploadProcessor};
use sluice_storage::{BoxedReader, Destination};
use tokio_util::io::StreamReader;

use crate::error::HttpAppError;

#[derive(Debug, Clone, Copy)]
pub struct InterceptLimits {
    pub max_files: usize,
}

/// A multipart body after its file parts were replaced.
#[derive(Debug)]
pub struct RewrittenBody {
    pub body: Bytes,
    pub content_type: String,
    /// Signed token listing every rewritten field and its stored location.
    pub signed_fields: String,
    pub file_count: usize,
}

#[derive(Debug)]
pub enum Intercepted {
    /// Not a multipart request; the body was not touched.
    Passthrough(Body),
    Rewritten(RewrittenBody),
}

fn multipart_error(err: multer::Error) -> HttpAppError {
    AppError::BadRequest(format!("malformed multipart body: {}", err)).into()
}

fn in_group(name: &str, group: &str) -> bool {
    name.strip_prefix(group)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// Whether a client value field could be mistaken for something the
/// gateway wrote or will write.
fn is_injected_field(
    name: &str,
    rewritten: &BTreeMap<String, String>,
    writer: &MultipartWriter,
    reserved_groups: &[&str],
) -> bool {
    if rewritten.contains_key(name) || writer.wrote(name) {
        return true;
    }
    if reserved_groups.iter().any(|group| in_group(name, group)) {
        return true;
    }
    if LOCATOR_FIELD_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
    {
        return true;
    }
    rewritten.keys().any(|field| {
        name.strip_prefix(field.as_str())
            .is_some_and(|rest| RESERVED_FIELD_SUFFIXES.contains(&rest))
    })
}

/// Earlier value fields that collide with the fields about to be written
/// for `file_field`.
fn collides_with_values(file_field: &str, values: &HashSet<String>) -> bool {
    values.iter().any(|name| {
        name == file_field
            || name
                .strip_prefix(file_field)
                .is_some_and(|rest| RESERVED_FIELD_SUFFIXES.contains(&rest))
    })
}

pub(crate) async fn cancellable<F, T>(ctx: &RequestContext, fut: F) -> Result<T, HttpAppError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ProcessingError::ContextEnded.into()),
        value = fut => Ok(value),
    }
}

/// Rewrite `body` for the upstream.
///
/// Stops reading the client body as soon as `ctx` is cancelled. Nothing
/// stored along the way is removed here; temp files are reclaimed when the
/// request context ends.
pub async fn intercept<P>(
    ctx: &RequestContext,
    headers: &HeaderMap,
    body: Body,
    processor: &mut P,
    destination: &Destination,
    signer: &FieldSigner,
    limits: InterceptLimits,
) -> Result<Intercepted, HttpAppError>
where
    P: UploadProcessor + ?Sized,
{
    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|content_type| multer::parse_boundary(content_type).ok())
    else {
        return Ok(Intercepted::Passthrough(body));
    };

    let mut multipart = multer::Multipart::new(body.into_data_stream(), boundary);
    let mut writer = MultipartWriter::new();
    let mut rewritten: BTreeMap<String, String> = BTreeMap::new();
    let mut values: HashSet<String> = HashSet::new();
    let mut file_count = 0usize;

    while let Some(field) = cancellable(ctx, multipart.next_field())
        .await?
        .map_err(multipart_error)?
    {
        let name = field.name().unwrap_or_default().to_string();

        let Some(filename) = field.file_name().map(str::to_string) else {
            if is_injected_field(&name, &rewritten, &writer, processor.reserved_groups()) {
                return Err(AppError::BadRequest(format!(
                    "field {:?} is reserved for gateway use",
                    name
                ))
                .into());
            }
            let content_type = field.content_type().map(|mime| mime.to_string());
            let value = cancellable(ctx, field.bytes())
                .await?
                .map_err(multipart_error)?;
            writer.write_value(&name, content_type.as_deref(), &value);
            values.insert(name);
            continue;
        };

        file_count += 1;
        if file_count > limits.max_files {
            return Err(AppError::TooManyFiles(format!(
                "request contains more than {} files",
                limits.max_files
            ))
            .into());
        }
        if collides_with_values(&name, &values) {
            return Err(AppError::BadRequest(format!(
                "file field {:?} collides with a value field",
                name
            ))
            .into());
        }

        let reader: BoxedReader =
            Box::pin(StreamReader::new(field.map_err(std::io::Error::other)));
        let reader = processor.transform_contents(ctx, &filename, reader)?;
        let handle = destination.upload(ctx, &filename, None, reader).await?;

        tracing::debug!(
            request_id = %ctx.request_id(),
            field = %name,
            filename = %filename,
            size = handle.size,
            processor = processor.name(),
            "Stored multipart file"
        );

        for (key, value) in handle
            .finalize_fields(&name, signer)
            .map_err(AppError::from)?
        {
            writer.write_field(&key, &value);
        }

        processor
            .process_file(ctx, &name, &handle, &mut writer)
            .await?;

        if let Some(value) = values.iter().find(|value| writer.wrote(value)) {
            return Err(AppError::BadRequest(format!(
                "field {:?} is reserved for gateway use",
                value
            ))
            .into());
        }

        rewritten.insert(name, handle.locator().unwrap_or_default());
    }

    let signed_fields = signer.sign(&rewritten).map_err(AppError::from)?;
    let content_type = writer.content_type();

    Ok(Intercepted::Rewritten(RewrittenBody {
        body: writer.finish(),
        content_type,
        signed_fields,
        file_count,
    }))
}
