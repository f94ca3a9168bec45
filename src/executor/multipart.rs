//! Multipart body assembly for `bodyType=formdata` (spec.md §4.4 step 4,
//! §6 "multipart execute" wire format).

use crate::domain::model::{FormField, FormFieldType};
use crate::domain::PersistencePort;
use crate::storage::FileStoragePort;

pub async fn build_form(
    fields: &[FormField],
    persistence: &dyn PersistencePort,
    storage: &dyn FileStoragePort,
    workspace_id: i64,
) -> Result<reqwest::multipart::Form, anyhow::Error> {
    let mut form = reqwest::multipart::Form::new();
    for field in fields.iter().filter(|f| f.enabled) {
        form = match field.field_type {
            FormFieldType::Text => form.text(field.key.clone(), field.value.clone()),
            FormFieldType::File => {
                let file_id: i64 = field.value.parse()?;
                let meta = persistence.get_uploaded_file(workspace_id, file_id).await?;
                let bytes = storage.open(&meta.stored_name).await?;
                let part = reqwest::multipart::Part::bytes(bytes.to_vec())
                    .file_name(meta.original_name.clone())
                    .mime_str(&meta.content_type)?;
                form.part(field.key.clone(), part)
            }
        };
    }
    Ok(form)
}
